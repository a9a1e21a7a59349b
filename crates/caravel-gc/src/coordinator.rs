//! The collection coordinator.
//!
//! A single task owns the four-phase state machine and processes one mailbox
//! message at a time. Scans and compactions run as background tasks whose
//! only effect on the coordinator is the `ScanDone` / `CompactDone` message
//! they eventually enqueue; writers talk to the coordinator through a
//! cloneable [`GcHandle`] and await a one-shot acknowledgement.

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use caravel_store::{
    DeploymentRepository, GroupRepository, PathId, Plan, RootSnapshot, Version,
    VersionedRepository,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bookkeeping::{BlockedWrites, TrackedWrites};
use crate::compact::Compactor;
use crate::config::GcConfig;
use crate::message::{Ack, GcMessage};
use crate::scan::{ScanResult, Scanner};

/// Counter incremented on each compaction completion.
pub const GC_RUNS_METRIC: &str = "persistence.gc.runs";

/// Histogram of scan phase duration, in milliseconds.
pub const SCAN_DURATION_METRIC: &str = "persistence.gc.scan.duration";

/// Histogram of compaction phase duration, in milliseconds.
pub const COMPACTION_DURATION_METRIC: &str = "persistence.gc.compaction.duration";

/// Mailbox capacity of the coordinator task.
const MAILBOX_CAPACITY: usize = 256;

/// Repository handles the collector operates over.
#[derive(Clone)]
pub struct Repositories {
    /// App definitions.
    pub apps: Arc<dyn VersionedRepository>,

    /// Pod definitions.
    pub pods: Arc<dyn VersionedRepository>,

    /// Root snapshots.
    pub groups: Arc<dyn GroupRepository>,

    /// In-flight deployment plans.
    pub deployments: Arc<dyn DeploymentRepository>,
}

/// Counters accumulated across collection cycles.
#[derive(Clone, Debug, Default)]
pub struct GcStats {
    /// Scans started.
    pub scans_started: u64,

    /// Compactions completed.
    pub compactions_run: u64,

    /// Cycles completed (with or without a compaction).
    pub cycles_completed: u64,

    /// Root version deletions issued.
    pub roots_deleted: u64,

    /// Full app deletions issued.
    pub apps_deleted: u64,

    /// App version deletions issued.
    pub app_versions_deleted: u64,

    /// Full pod deletions issued.
    pub pods_deleted: u64,

    /// Pod version deletions issued.
    pub pod_versions_deleted: u64,

    /// Writes whose acknowledgement was deferred until a compaction finished.
    pub writes_pinned: u64,
}

/// Error surfaced by [`GcHandle`] operations.
///
/// The collector itself never fails a write; the only observable error is
/// the coordinator task being gone.
#[derive(Debug)]
pub enum GcError {
    /// The coordinator task has shut down.
    Shutdown,
}

impl std::fmt::Display for GcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcError::Shutdown => write!(f, "Collector has shut down"),
        }
    }
}

impl std::error::Error for GcError {}

/// Result type for handle operations.
pub type GcResult<T> = Result<T, GcError>;

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct GcHandle {
    tx: mpsc::Sender<GcMessage>,
}

impl GcHandle {
    /// Trigger a collection cycle.
    ///
    /// Ignored while resting; coalesced into at most one extra cycle while a
    /// cycle is already in flight.
    pub async fn run_gc(&self) -> GcResult<()> {
        self.tx
            .send(GcMessage::RunGc)
            .await
            .map_err(|_| GcError::Shutdown)
    }

    /// Announce an app store and await admission.
    pub async fn store_app(&self, id: PathId, version: Option<Version>) -> GcResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(GcMessage::StoreApp { id, version, ack })
            .await
            .map_err(|_| GcError::Shutdown)?;
        done.await.map_err(|_| GcError::Shutdown)
    }

    /// Announce a pod store and await admission.
    pub async fn store_pod(&self, id: PathId, version: Option<Version>) -> GcResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(GcMessage::StorePod { id, version, ack })
            .await
            .map_err(|_| GcError::Shutdown)?;
        done.await.map_err(|_| GcError::Shutdown)
    }

    /// Announce a root store and await admission.
    pub async fn store_root(&self, root: RootSnapshot) -> GcResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(GcMessage::StoreRoot { root, ack })
            .await
            .map_err(|_| GcError::Shutdown)?;
        done.await.map_err(|_| GcError::Shutdown)
    }

    /// Announce a plan store and await admission of both of its roots.
    pub async fn store_plan(&self, plan: Plan) -> GcResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(GcMessage::StorePlan { plan, ack })
            .await
            .map_err(|_| GcError::Shutdown)?;
        done.await.map_err(|_| GcError::Shutdown)
    }

    /// Snapshot of the accumulated cycle statistics.
    pub async fn stats(&self) -> GcResult<GcStats> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(GcMessage::Stats(reply))
            .await
            .map_err(|_| GcError::Shutdown)?;
        response.await.map_err(|_| GcError::Shutdown)
    }
}

/// Phase of the collection state machine.
enum GcState {
    /// Waiting out the cleaning interval.
    Resting,

    /// Idle, ready to scan on the next trigger.
    ReadyForGc,

    /// A scan task is in flight; concurrent writes are tracked.
    Scanning(TrackedWrites),

    /// A compact task is in flight; conflicting writes are pinned.
    Compacting(BlockedWrites),
}

/// The collection coordinator task.
pub struct GcCoordinator {
    config: GcConfig,
    repositories: Repositories,
    rx: mpsc::Receiver<GcMessage>,
    // Weak so the coordinator's own loopback (timer, phase tasks) does not
    // keep the mailbox open after every handle is gone.
    tx: mpsc::WeakSender<GcMessage>,
    state: GcState,
    stats: GcStats,
    scan_started: Option<Instant>,
    compact_started: Option<Instant>,
}

impl GcCoordinator {
    /// Spawn a coordinator task and return a handle to it.
    ///
    /// The task terminates once every handle is dropped and the in-flight
    /// phase (if any) has completed.
    pub fn spawn(config: GcConfig, repositories: Repositories) -> GcHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let state = if config.cleaning_interval_ms == 0 {
            GcState::ReadyForGc
        } else {
            GcState::Resting
        };

        let coordinator = GcCoordinator {
            config,
            repositories,
            rx,
            tx: tx.downgrade(),
            state,
            stats: GcStats::default(),
            scan_started: None,
            compact_started: None,
        };
        tokio::spawn(coordinator.run());

        GcHandle { tx }
    }

    async fn run(mut self) {
        if matches!(self.state, GcState::Resting) {
            self.arm_timer();
        }

        while let Some(message) = self.rx.recv().await {
            self.handle(message);
        }
        debug!("coordinator mailbox closed, shutting down");
    }

    /// Dispatch one message. Handlers never block; long work runs in
    /// background tasks that report back through the mailbox.
    fn handle(&mut self, message: GcMessage) {
        match message {
            GcMessage::RunGc => self.on_run_gc(),
            GcMessage::WakeUp => self.on_wake_up(),
            GcMessage::ScanDone(result) => self.on_scan_done(result),
            GcMessage::CompactDone => self.on_compact_done(),
            GcMessage::StoreApp { id, version, ack } => self.on_store_app(id, version, ack),
            GcMessage::StorePod { id, version, ack } => self.on_store_pod(id, version, ack),
            GcMessage::StoreRoot { root, ack } => self.on_store_root(root, ack),
            GcMessage::StorePlan { plan, ack } => self.on_store_plan(plan, ack),
            GcMessage::Stats(reply) => {
                let _ = reply.send(self.stats.clone());
            }
        }
    }

    fn on_run_gc(&mut self) {
        match &mut self.state {
            GcState::Resting => debug!("ignoring collection request while resting"),
            GcState::ReadyForGc => self.start_scan(),
            GcState::Scanning(tracked) => tracked.gc_requested = true,
            GcState::Compacting(blocked) => blocked.gc_requested = true,
        }
    }

    fn on_wake_up(&mut self) {
        if matches!(self.state, GcState::Resting) {
            self.state = GcState::ReadyForGc;
        }
    }

    fn on_scan_done(&mut self, result: ScanResult) {
        let previous = mem::replace(&mut self.state, GcState::ReadyForGc);
        let tracked = match previous {
            GcState::Scanning(tracked) => tracked,
            other => {
                self.state = other;
                warn!("dropping scan result outside the scanning phase");
                return;
            }
        };

        if let Some(started) = self.scan_started.take() {
            metrics::histogram!(SCAN_DURATION_METRIC)
                .record(started.elapsed().as_secs_f64() * 1000.0);
        }

        if result.is_empty() {
            debug!("scan found nothing to collect");
            self.stats.cycles_completed += 1;
            if tracked.gc_requested {
                self.start_scan();
            } else {
                self.enter_idle();
            }
            return;
        }

        let blocked = BlockedWrites::from_scan(result, &tracked);
        self.start_compact(blocked);
    }

    fn on_compact_done(&mut self) {
        let previous = mem::replace(&mut self.state, GcState::ReadyForGc);
        let blocked = match previous {
            GcState::Compacting(blocked) => blocked,
            other => {
                self.state = other;
                warn!("compact completion arrived outside the compacting phase");
                return;
            }
        };

        if let Some(started) = self.compact_started.take() {
            metrics::histogram!(COMPACTION_DURATION_METRIC)
                .record(started.elapsed().as_secs_f64() * 1000.0);
        }
        metrics::counter!(GC_RUNS_METRIC).increment(1);

        self.stats.compactions_run += 1;
        self.stats.cycles_completed += 1;

        // Release every writer whose acknowledgement waited on this pass.
        for ack in blocked.pending {
            let _ = ack.send(());
        }

        if blocked.gc_requested {
            self.start_scan();
        } else {
            self.enter_idle();
        }
    }

    fn on_store_app(&mut self, id: PathId, version: Option<Version>, ack: Ack) {
        match &mut self.state {
            GcState::Resting | GcState::ReadyForGc => {
                let _ = ack.send(());
            }
            GcState::Scanning(tracked) => {
                tracked.record_app(&id, version);
                let _ = ack.send(());
            }
            GcState::Compacting(blocked) => {
                if blocked.app_write_conflicts(&id, version) {
                    debug!(%id, "pinning app store until compaction finishes");
                    self.stats.writes_pinned += 1;
                    blocked.pending.push(ack);
                } else {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn on_store_pod(&mut self, id: PathId, version: Option<Version>, ack: Ack) {
        match &mut self.state {
            GcState::Resting | GcState::ReadyForGc => {
                let _ = ack.send(());
            }
            GcState::Scanning(tracked) => {
                tracked.record_pod(&id, version);
                let _ = ack.send(());
            }
            GcState::Compacting(blocked) => {
                if blocked.pod_write_conflicts(&id, version) {
                    debug!(%id, "pinning pod store until compaction finishes");
                    self.stats.writes_pinned += 1;
                    blocked.pending.push(ack);
                } else {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn on_store_root(&mut self, root: RootSnapshot, ack: Ack) {
        match &mut self.state {
            GcState::Resting | GcState::ReadyForGc => {
                let _ = ack.send(());
            }
            GcState::Scanning(tracked) => {
                tracked.record_root(&root);
                let _ = ack.send(());
            }
            GcState::Compacting(blocked) => {
                if blocked.root_write_conflicts(&root) {
                    debug!(version = %root.version, "pinning root store until compaction finishes");
                    self.stats.writes_pinned += 1;
                    blocked.pending.push(ack);
                } else {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn on_store_plan(&mut self, plan: Plan, ack: Ack) {
        match &mut self.state {
            GcState::Resting | GcState::ReadyForGc => {
                let _ = ack.send(());
            }
            GcState::Scanning(tracked) => {
                tracked.record_plan(&plan);
                let _ = ack.send(());
            }
            GcState::Compacting(blocked) => {
                // Decompose into two internal root stores; the outer handle
                // completes only once both inner handles have.
                let (original_ack, original_done) = oneshot::channel();
                let (target_ack, target_done) = oneshot::channel();
                tokio::spawn(async move {
                    let _ = original_done.await;
                    let _ = target_done.await;
                    let _ = ack.send(());
                });

                for (root, inner) in [(&plan.original, original_ack), (&plan.target, target_ack)] {
                    if blocked.root_write_conflicts(root) {
                        debug!(
                            plan = %plan.id,
                            version = %root.version,
                            "pinning plan root until compaction finishes"
                        );
                        self.stats.writes_pinned += 1;
                        blocked.pending.push(inner);
                    } else {
                        let _ = inner.send(());
                    }
                }
            }
        }
    }

    /// Launch the scan task and move to the scanning phase.
    fn start_scan(&mut self) {
        let tx = match self.tx.upgrade() {
            Some(tx) => tx,
            None => return,
        };

        info!("starting retention scan");
        self.state = GcState::Scanning(TrackedWrites::default());
        self.stats.scans_started += 1;
        self.scan_started = Some(Instant::now());

        let scanner = Scanner::new(&self.config, self.repositories.clone());
        tokio::spawn(async move {
            let result = scanner.run().await;
            let _ = tx.send(GcMessage::ScanDone(result)).await;
        });
    }

    /// Launch the compact task and move to the compacting phase.
    fn start_compact(&mut self, blocked: BlockedWrites) {
        let tx = match self.tx.upgrade() {
            Some(tx) => tx,
            None => return,
        };

        info!(
            deletions = blocked.deletes.delete_count(),
            "starting compaction"
        );
        self.stats.roots_deleted += blocked.deletes.roots_delete.len() as u64;
        self.stats.apps_deleted += blocked.deletes.apps_full_delete.len() as u64;
        self.stats.app_versions_deleted += blocked
            .deletes
            .app_versions_delete
            .values()
            .map(|versions| versions.len() as u64)
            .sum::<u64>();
        self.stats.pods_deleted += blocked.deletes.pods_full_delete.len() as u64;
        self.stats.pod_versions_deleted += blocked
            .deletes
            .pod_versions_delete
            .values()
            .map(|versions| versions.len() as u64)
            .sum::<u64>();
        self.compact_started = Some(Instant::now());

        let deletes = blocked.deletes.clone();
        self.state = GcState::Compacting(blocked);

        let compactor = Compactor::new(self.repositories.clone());
        tokio::spawn(async move {
            compactor.run(deletes).await;
            let _ = tx.send(GcMessage::CompactDone).await;
        });
    }

    /// Return to the idle phase: resting when an interval is configured,
    /// ready otherwise.
    fn enter_idle(&mut self) {
        if self.config.cleaning_interval_ms == 0 {
            self.state = GcState::ReadyForGc;
        } else {
            self.state = GcState::Resting;
            self.arm_timer();
        }
    }

    /// Arm the one-shot wake-up timer for the resting phase.
    ///
    /// The timer holds only a weak sender, so an armed timer never delays
    /// shutdown.
    fn arm_timer(&self) {
        let delay = self.config.cleaning_interval();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(GcMessage::WakeUp).await;
            }
        });
    }
}
