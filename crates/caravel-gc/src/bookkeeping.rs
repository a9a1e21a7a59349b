//! Per-cycle bookkeeping: writes observed while scanning, and the deletion
//! set being executed while compacting.
//!
//! Both structures live only within a single collection cycle and are
//! discarded when the phase exits.

use std::collections::{BTreeSet, HashMap, HashSet};

use caravel_store::{PathId, Plan, RootSnapshot, Version};

use crate::message::Ack;
use crate::scan::ScanResult;

/// Writes acknowledged while the scan phase was running.
///
/// The scan works against a snapshot of the repositories; anything stored
/// after it started may look like garbage to it. Everything recorded here is
/// subtracted from the raw scan result before the compact phase executes it.
#[derive(Clone, Debug, Default)]
pub struct TrackedWrites {
    /// App definitions stored (without a specific version).
    pub apps_stored: HashSet<PathId>,

    /// App versions stored, per definition.
    pub app_versions_stored: HashMap<PathId, BTreeSet<Version>>,

    /// Pod definitions stored.
    pub pods_stored: HashSet<PathId>,

    /// Pod versions stored, per definition.
    pub pod_versions_stored: HashMap<PathId, BTreeSet<Version>>,

    /// Root versions stored.
    pub roots_stored: BTreeSet<Version>,

    /// Another collection was requested while this cycle was in flight.
    pub gc_requested: bool,
}

impl TrackedWrites {
    /// Record an app store.
    pub fn record_app(&mut self, id: &PathId, version: Option<Version>) {
        match version {
            Some(version) => {
                self.app_versions_stored
                    .entry(id.clone())
                    .or_default()
                    .insert(version);
            }
            None => {
                self.apps_stored.insert(id.clone());
            }
        }
    }

    /// Record a pod store.
    pub fn record_pod(&mut self, id: &PathId, version: Option<Version>) {
        match version {
            Some(version) => {
                self.pod_versions_stored
                    .entry(id.clone())
                    .or_default()
                    .insert(version);
            }
            None => {
                self.pods_stored.insert(id.clone());
            }
        }
    }

    /// Record a root store, including everything it transitively references.
    pub fn record_root(&mut self, root: &RootSnapshot) {
        self.roots_stored.insert(root.version);
        for (id, versions) in &root.transitive_apps {
            self.app_versions_stored
                .entry(id.clone())
                .or_default()
                .extend(versions.iter().copied());
        }
        for (id, versions) in &root.transitive_pods {
            self.pod_versions_stored
                .entry(id.clone())
                .or_default()
                .extend(versions.iter().copied());
        }
    }

    /// Record a plan store as if both of its roots had been stored.
    pub fn record_plan(&mut self, plan: &Plan) {
        self.record_root(&plan.original);
        self.record_root(&plan.target);
    }
}

/// The deletion set being executed by the compact phase.
///
/// Doubles as the index for pin-or-release decisions on writes arriving
/// while compaction runs: a conflicting writer's handle is parked in
/// `pending` and completed when the phase ends.
#[derive(Debug, Default)]
pub struct BlockedWrites {
    /// The effective deletion set.
    pub deletes: ScanResult,

    /// Completion handles of writers pinned until this compaction finishes.
    pub pending: Vec<Ack>,

    /// Another collection was requested while compacting.
    pub gc_requested: bool,
}

impl BlockedWrites {
    /// Derive the effective deletion set from a raw scan result by removing
    /// everything a writer announced during the scan.
    pub fn from_scan(scan: ScanResult, tracked: &TrackedWrites) -> Self {
        let mut deletes = scan;

        deletes.apps_full_delete.retain(|id| {
            !tracked.apps_stored.contains(id) && !tracked.app_versions_stored.contains_key(id)
        });
        for (id, stored) in &tracked.app_versions_stored {
            if let Some(candidates) = deletes.app_versions_delete.get_mut(id) {
                candidates.retain(|version| !stored.contains(version));
            }
        }
        deletes.app_versions_delete.retain(|_, versions| !versions.is_empty());

        deletes.pods_full_delete.retain(|id| {
            !tracked.pods_stored.contains(id) && !tracked.pod_versions_stored.contains_key(id)
        });
        for (id, stored) in &tracked.pod_versions_stored {
            if let Some(candidates) = deletes.pod_versions_delete.get_mut(id) {
                candidates.retain(|version| !stored.contains(version));
            }
        }
        deletes.pod_versions_delete.retain(|_, versions| !versions.is_empty());

        deletes
            .roots_delete
            .retain(|version| !tracked.roots_stored.contains(version));

        BlockedWrites {
            deletes,
            pending: Vec::new(),
            gc_requested: tracked.gc_requested,
        }
    }

    /// Whether an app store conflicts with an in-flight deletion.
    pub fn app_write_conflicts(&self, id: &PathId, version: Option<Version>) -> bool {
        if self.deletes.apps_full_delete.contains(id) {
            return true;
        }
        match version {
            Some(version) => self
                .deletes
                .app_versions_delete
                .get(id)
                .is_some_and(|versions| versions.contains(&version)),
            None => false,
        }
    }

    /// Whether a pod store conflicts with an in-flight deletion.
    pub fn pod_write_conflicts(&self, id: &PathId, version: Option<Version>) -> bool {
        if self.deletes.pods_full_delete.contains(id) {
            return true;
        }
        match version {
            Some(version) => self
                .deletes
                .pod_versions_delete
                .get(id)
                .is_some_and(|versions| versions.contains(&version)),
            None => false,
        }
    }

    /// Whether a root store conflicts with an in-flight deletion.
    ///
    /// Any app-id overlap with the version-level deletions pins the root,
    /// even when the exact versions differ. Pod references are not consulted
    /// when pinning roots.
    pub fn root_write_conflicts(&self, root: &RootSnapshot) -> bool {
        if self.deletes.roots_delete.contains(&root.version) {
            return true;
        }
        root.transitive_apps.keys().any(|id| {
            self.deletes.apps_full_delete.contains(id)
                || self.deletes.app_versions_delete.contains_key(id)
        })
    }
}
