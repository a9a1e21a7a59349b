//! Stress testing for the Caravel retention core.
//!
//! This module provides stress tests for:
//! - Retention caps under concurrent app/pod/root churn
//! - Deployment-plan pinning while collection cycles run
//! - Write acknowledgement under pin-or-release arbitration

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use caravel_gc::{GcConfigBuilder, GcCoordinator, GcHandle, GcStats, Repositories};
use caravel_store::{
    DeploymentRepository, GroupRepository, MemoryDeploymentRepository, MemoryGroupRepository,
    MemoryVersionedRepository, PathId, Plan, RootSnapshot, Version,
};
use futures::stream::{Stream, StreamExt};
use futures::TryStreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Statistics & Reporting
// ============================================================================

/// Statistics collected during a stress run.
#[derive(Clone, Debug)]
pub struct GcStressStats {
    pub test_name: String,
    pub num_writers: usize,
    pub ops_per_writer: usize,
    pub cycles_completed: u64,
    pub compactions_run: u64,
    pub writes_pinned: u64,
    pub records_deleted: u64,
    pub total_time: Duration,
    pub ops_per_second: f64,
    pub invariants_held: bool,
}

impl GcStressStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║  {:^56} ║", format!("{} Results", self.test_name));
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Writers:         {:>38} ║", self.num_writers);
        println!("║  Ops/Writer:      {:>38} ║", self.ops_per_writer);
        println!("║  Cycles:          {:>38} ║", self.cycles_completed);
        println!("║  Compactions:     {:>38} ║", self.compactions_run);
        println!("║  Writes Pinned:   {:>38} ║", self.writes_pinned);
        println!("║  Records Deleted: {:>38} ║", self.records_deleted);
        println!(
            "║  Total Time:      {:>37.3}s ║",
            self.total_time.as_secs_f64()
        );
        println!("║  Ops/Second:      {:>38.0} ║", self.ops_per_second);
        println!(
            "║  Invariants:      {:>38} ║",
            if self.invariants_held {
                "✓ Held"
            } else {
                "✗ VIOLATED"
            }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Shared store fixture a stress run operates on.
#[derive(Clone)]
struct Store {
    apps: MemoryVersionedRepository,
    pods: MemoryVersionedRepository,
    groups: MemoryGroupRepository,
    deployments: MemoryDeploymentRepository,
    clock: Arc<AtomicU64>,
}

impl Store {
    fn new() -> Self {
        let store = Store {
            apps: MemoryVersionedRepository::new(),
            pods: MemoryVersionedRepository::new(),
            groups: MemoryGroupRepository::new(),
            deployments: MemoryDeploymentRepository::new(),
            clock: Arc::new(AtomicU64::new(1)),
        };
        // Seed a current root so every scan has one to read.
        let version = store.tick();
        store.groups.put_root(RootSnapshot::new(version));
        store
    }

    fn repositories(&self) -> Repositories {
        Repositories {
            apps: Arc::new(self.apps.clone()),
            pods: Arc::new(self.pods.clone()),
            groups: Arc::new(self.groups.clone()),
            deployments: Arc::new(self.deployments.clone()),
        }
    }

    /// Next timestamp version from the shared clock.
    fn tick(&self) -> Version {
        Version(self.clock.fetch_add(1, Ordering::SeqCst))
    }
}

/// One writer operation, with the definition index it targets.
#[derive(Clone, Copy, Debug)]
enum WriterOp {
    AppVersion(usize),
    PodVersion(usize),
    Root,
    Plan,
    Trigger,
}

/// Generator yielding a randomized operation schedule for one writer.
fn op_schedule(ops: usize, seed: u64) -> impl Stream<Item = WriterOp> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..ops {
            let roll = rng.gen_range(0..100);
            let id = rng.gen_range(0..6);
            yield match roll {
                0..=39 => WriterOp::AppVersion(id),
                40..=59 => WriterOp::PodVersion(id),
                60..=79 => WriterOp::Root,
                80..=89 => WriterOp::Plan,
                _ => WriterOp::Trigger,
            };
        }
    }
}

fn app_id(index: usize) -> PathId {
    PathId::new(format!("/stress/app-{}", index))
}

fn pod_id(index: usize) -> PathId {
    PathId::new(format!("/stress/pod-{}", index))
}

/// Run one writer to completion: store into the repositories, announce to
/// the collector, occasionally trigger collection.
///
/// Root stores persist fresh definitions alongside the root, so a root never
/// references anything an already-computed deletion set could name.
async fn run_writer(writer: usize, ops: usize, store: Store, handle: GcHandle) {
    let mut schedule = Box::pin(op_schedule(ops, writer as u64));

    while let Some(op) = schedule.next().await {
        match op {
            WriterOp::AppVersion(index) => {
                let id = app_id(index);
                let version = store.tick();
                store.apps.put_version(id.clone(), version);
                handle
                    .store_app(id, Some(version))
                    .await
                    .expect("collector alive");
            }
            WriterOp::PodVersion(index) => {
                let id = pod_id(index);
                let version = store.tick();
                store.pods.put_version(id.clone(), version);
                handle
                    .store_pod(id, Some(version))
                    .await
                    .expect("collector alive");
            }
            WriterOp::Root => {
                let app = PathId::new(format!("/stress/rooted/app-{}-{}", writer, store.tick()));
                let pod = PathId::new(format!("/stress/rooted/pod-{}-{}", writer, store.tick()));
                let app_version = store.tick();
                let pod_version = store.tick();
                store.apps.put_version(app.clone(), app_version);
                store.pods.put_version(pod.clone(), pod_version);

                let root = RootSnapshot::new(store.tick())
                    .with_app(app, app_version)
                    .with_pod(pod, pod_version);
                store.groups.put_root(root.clone());
                handle.store_root(root).await.expect("collector alive");
            }
            WriterOp::Plan => {
                let original = RootSnapshot::new(store.tick());
                let target = RootSnapshot::new(store.tick());
                store.groups.put_root_version(original.clone());
                store.groups.put_root_version(target.clone());
                let plan = Plan::new(
                    format!("deploy-{}-{}", writer, original.version),
                    original,
                    target,
                );
                store.deployments.put_plan(&plan);
                handle.store_plan(plan).await.expect("collector alive");
            }
            WriterOp::Trigger => {
                handle.run_gc().await.expect("collector alive");
            }
        }

        if store.clock.load(Ordering::SeqCst) % 64 == 0 {
            tokio::task::yield_now().await;
        }
    }
}

/// Wait until the collector has gone quiet: every started scan has completed
/// its cycle and the count is stable across a settling window.
async fn wait_for_quiet(handle: &GcHandle) -> GcStats {
    let mut last = handle.stats().await.expect("collector alive");
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = handle.stats().await.expect("collector alive");
        if stats.cycles_completed == last.cycles_completed
            && stats.scans_started == stats.cycles_completed
        {
            return stats;
        }
        last = stats;
    }
}

// ============================================================================
// Invariant checks
// ============================================================================

/// Everything the current root and surviving plans reference must still be
/// stored, and the surviving unpinned root count must respect the cap.
async fn check_invariants(store: &Store, max_versions: usize) -> bool {
    let mut held = true;

    let current = match store.groups.root().await {
        Ok(root) => root,
        Err(_) => {
            println!("  ✗ current root is gone");
            return false;
        }
    };

    for (id, versions) in &current.transitive_apps {
        for version in versions {
            if !store.apps.versions_of(id).contains(version) {
                println!("  ✗ current root references missing app {}@{}", id, version);
                held = false;
            }
        }
    }
    for (id, versions) in &current.transitive_pods {
        for version in versions {
            if !store.pods.versions_of(id).contains(version) {
                println!("  ✗ current root references missing pod {}@{}", id, version);
                held = false;
            }
        }
    }

    let plans = store
        .deployments
        .all()
        .try_collect::<Vec<_>>()
        .await
        .expect("in-memory enumeration");

    let mut pinned: HashSet<Version> = HashSet::new();
    pinned.insert(current.version);
    for plan in &plans {
        pinned.insert(plan.original_version);
        pinned.insert(plan.target_version);
        for version in [plan.original_version, plan.target_version] {
            if !store.groups.contains_version(version) {
                println!("  ✗ plan {} references missing root {}", plan.id, version);
                held = false;
            }
        }
    }

    let unpinned_survivors = store
        .groups
        .stored_versions()
        .iter()
        .filter(|version| !pinned.contains(version))
        .count();
    if unpinned_survivors > max_versions {
        println!(
            "  ✗ {} unpinned roots survive a cap of {}",
            unpinned_survivors, max_versions
        );
        held = false;
    }

    held
}

// ============================================================================
// Stress tests
// ============================================================================

/// Concurrent app/pod/root churn against a collecting coordinator.
pub async fn stress_test_retention(
    num_writers: usize,
    ops_per_writer: usize,
    max_versions: usize,
) -> GcStressStats {
    println!(
        "\n── Retention churn: {} writers × {} ops, cap {} ──",
        num_writers, ops_per_writer, max_versions
    );

    let start = Instant::now();
    let store = Store::new();
    let config = GcConfigBuilder::new()
        .max_versions(max_versions)
        .cleaning_interval(0)
        .build();
    let handle = GcCoordinator::spawn(config, store.repositories());

    let mut tasks = vec![];
    for writer in 0..num_writers {
        let store = store.clone();
        let gc = handle.clone();
        tasks.push(tokio::spawn(run_writer(writer, ops_per_writer, store, gc)));
    }
    for task in tasks {
        let _ = task.await;
    }

    // One last cycle over the settled store, then let everything drain.
    handle.run_gc().await.expect("collector alive");
    let stats = wait_for_quiet(&handle).await;

    let invariants_held = check_invariants(&store, max_versions).await;

    let total_time = start.elapsed();
    let total_ops = num_writers * ops_per_writer;

    GcStressStats {
        test_name: "Retention Churn".to_string(),
        num_writers,
        ops_per_writer,
        cycles_completed: stats.cycles_completed,
        compactions_run: stats.compactions_run,
        writes_pinned: stats.writes_pinned,
        records_deleted: stats.roots_deleted
            + stats.apps_deleted
            + stats.app_versions_deleted
            + stats.pods_deleted
            + stats.pod_versions_deleted,
        total_time,
        ops_per_second: total_ops as f64 / total_time.as_secs_f64(),
        invariants_held,
    }
}

/// Plans pin roots while cycles run; removing a plan frees its roots for the
/// next cycle.
pub async fn stress_test_plan_churn(
    num_writers: usize,
    ops_per_writer: usize,
    max_versions: usize,
) -> GcStressStats {
    println!(
        "\n── Plan churn: {} writers × {} ops, cap {} ──",
        num_writers, ops_per_writer, max_versions
    );

    let start = Instant::now();
    let store = Store::new();
    let config = GcConfigBuilder::new()
        .max_versions(max_versions)
        .cleaning_interval(0)
        .build();
    let handle = GcCoordinator::spawn(config, store.repositories());

    let mut tasks = vec![];
    for writer in 0..num_writers {
        let store = store.clone();
        let gc = handle.clone();
        tasks.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(1000 + writer as u64);
            let mut own_plans: Vec<String> = Vec::new();

            for _ in 0..ops_per_writer {
                if rng.gen_bool(0.6) || own_plans.is_empty() {
                    let original = RootSnapshot::new(store.tick());
                    let target = RootSnapshot::new(store.tick());
                    store.groups.put_root_version(original.clone());
                    store.groups.put_root_version(target.clone());
                    let plan = Plan::new(
                        format!("churn-{}-{}", writer, original.version),
                        original,
                        target,
                    );
                    store.deployments.put_plan(&plan);
                    own_plans.push(plan.id.clone());
                    gc.store_plan(plan).await.expect("collector alive");
                } else {
                    // Deployment finished: the plan goes away and its roots
                    // become fair game for the next cycle.
                    let id = own_plans.remove(rng.gen_range(0..own_plans.len()));
                    store.deployments.remove_plan(&id);
                }

                if rng.gen_bool(0.2) {
                    gc.run_gc().await.expect("collector alive");
                }
            }
        }));
    }
    for task in tasks {
        let _ = task.await;
    }

    handle.run_gc().await.expect("collector alive");
    let stats = wait_for_quiet(&handle).await;

    let invariants_held = check_invariants(&store, max_versions).await;

    let total_time = start.elapsed();
    let total_ops = num_writers * ops_per_writer;

    GcStressStats {
        test_name: "Plan Churn".to_string(),
        num_writers,
        ops_per_writer,
        cycles_completed: stats.cycles_completed,
        compactions_run: stats.compactions_run,
        writes_pinned: stats.writes_pinned,
        records_deleted: stats.roots_deleted
            + stats.apps_deleted
            + stats.app_versions_deleted
            + stats.pods_deleted
            + stats.pod_versions_deleted,
        total_time,
        ops_per_second: total_ops as f64 / total_time.as_secs_f64(),
        invariants_held,
    }
}
