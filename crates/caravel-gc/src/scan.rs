//! Scan phase: compute the candidate deletion set.
//!
//! The scan walks the repositories and decides what is garbage: root
//! versions beyond the retention cap that nothing pins, app and pod
//! definitions no pinning root references, and per-definition version
//! history beyond the cap. It never deletes anything itself; its output is
//! diffed against concurrent writes before the compact phase executes it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use caravel_store::{
    DeploymentRepository, GroupRepository, PathId, RootSnapshot, StoreResult, StoredPlan, Version,
    VersionedRepository,
};
use futures::TryStreamExt;
use tracing::{debug, warn};

use crate::config::GcConfig;
use crate::coordinator::Repositories;

/// The candidate deletion set produced by one scan.
///
/// Batch results combine by elementwise union, so the empty value is the
/// identity and combining is associative and commutative.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// App definitions to delete entirely.
    pub apps_full_delete: HashSet<PathId>,

    /// App versions to delete, per definition.
    pub app_versions_delete: HashMap<PathId, BTreeSet<Version>>,

    /// Pod definitions to delete entirely.
    pub pods_full_delete: HashSet<PathId>,

    /// Pod versions to delete, per definition.
    pub pod_versions_delete: HashMap<PathId, BTreeSet<Version>>,

    /// Root versions to delete.
    pub roots_delete: BTreeSet<Version>,
}

impl ScanResult {
    /// Elementwise union with another result.
    pub fn union(mut self, other: ScanResult) -> ScanResult {
        self.apps_full_delete.extend(other.apps_full_delete);
        for (id, versions) in other.app_versions_delete {
            self.app_versions_delete.entry(id).or_default().extend(versions);
        }
        self.pods_full_delete.extend(other.pods_full_delete);
        for (id, versions) in other.pod_versions_delete {
            self.pod_versions_delete.entry(id).or_default().extend(versions);
        }
        self.roots_delete.extend(other.roots_delete);
        self
    }

    /// Whether the result triggers a compaction.
    ///
    /// Only apps and roots are consulted; a pods-only result is treated as
    /// empty and discarded.
    pub fn is_empty(&self) -> bool {
        self.apps_full_delete.is_empty()
            && self.app_versions_delete.is_empty()
            && self.roots_delete.is_empty()
    }

    /// Total number of individual deletions this result describes.
    pub fn delete_count(&self) -> usize {
        self.apps_full_delete.len()
            + self.app_versions_delete.values().map(BTreeSet::len).sum::<usize>()
            + self.pods_full_delete.len()
            + self.pod_versions_delete.values().map(BTreeSet::len).sum::<usize>()
            + self.roots_delete.len()
    }
}

/// The scan engine for one collection cycle.
pub(crate) struct Scanner {
    max_versions: usize,
    batch_size: usize,
    repositories: Repositories,
}

impl Scanner {
    pub fn new(config: &GcConfig, repositories: Repositories) -> Self {
        Scanner {
            max_versions: config.max_versions,
            batch_size: config.scan_batch_size.max(1),
            repositories,
        }
    }

    /// Run a full scan, swallowing repository errors into an empty result.
    pub async fn run(&self) -> ScanResult {
        match self.scan().await {
            Ok(result) => result,
            Err(error) => {
                warn!(%error, "scan failed, nothing will be collected this cycle");
                ScanResult::default()
            }
        }
    }

    async fn scan(&self) -> StoreResult<ScanResult> {
        let root_versions: BTreeSet<Version> = self
            .repositories
            .groups
            .root_versions()
            .try_collect()
            .await?;

        if root_versions.len() <= self.max_versions {
            debug!(
                roots = root_versions.len(),
                cap = self.max_versions,
                "root count within cap, nothing to scan"
            );
            return Ok(ScanResult::default());
        }

        let (current, plans) = tokio::join!(
            self.repositories.groups.root(),
            self.repositories
                .deployments
                .all()
                .try_collect::<Vec<StoredPlan>>(),
        );
        let current = current?;
        let plans = plans?;

        let mut pinned: BTreeSet<Version> = BTreeSet::new();
        pinned.insert(current.version);
        for plan in &plans {
            pinned.insert(plan.original_version);
            pinned.insert(plan.target_version);
        }

        // Oldest unpinned roots beyond the cap, ascending by timestamp.
        let excess = root_versions.len() - self.max_versions;
        let roots_delete: BTreeSet<Version> = root_versions
            .iter()
            .filter(|version| !pinned.contains(version))
            .take(excess)
            .copied()
            .collect();

        if roots_delete.is_empty() {
            debug!("every excess root is pinned, nothing to scan");
            return Ok(ScanResult::default());
        }

        self.scan_unused_definitions(roots_delete, &plans, &current)
            .await
    }

    /// Walk the pinning roots in batches and compute unused definitions and
    /// over-cap version history against them.
    async fn scan_unused_definitions(
        &self,
        roots_delete: BTreeSet<Version>,
        plans: &[StoredPlan],
        current: &RootSnapshot,
    ) -> StoreResult<ScanResult> {
        let all_apps: HashSet<PathId> = self.repositories.apps.ids().try_collect().await?;
        let all_pods: HashSet<PathId> = self.repositories.pods.ids().try_collect().await?;

        let pinning_versions: Vec<Version> = plans
            .iter()
            .flat_map(|plan| [plan.original_version, plan.target_version])
            .collect();

        let mut result = ScanResult::default();
        let mut batch: Vec<RootSnapshot> = Vec::with_capacity(self.batch_size);
        let mut batches = 0usize;

        // One hydration in flight at a time bounds repository load.
        for version in pinning_versions {
            match self.repositories.groups.root_version(version).await? {
                Some(root) => batch.push(root),
                None => debug!(%version, "pinning root vanished during scan"),
            }

            if batch.len() == self.batch_size {
                let scanned = self
                    .scan_batch(&batch, current, &all_apps, &all_pods, &roots_delete)
                    .await;
                result = result.union(scanned);
                batch.clear();
                batches += 1;
            }
        }

        // The final batch runs even when no plan roots remain: the current
        // root's usage still has to be accounted for, and the root deletions
        // are carried through it.
        if !batch.is_empty() || batches == 0 {
            let scanned = self
                .scan_batch(&batch, current, &all_apps, &all_pods, &roots_delete)
                .await;
            result = result.union(scanned);
        }

        Ok(result)
    }

    /// Scan one batch of pinning roots, swallowing batch-level errors.
    async fn scan_batch(
        &self,
        roots: &[RootSnapshot],
        current: &RootSnapshot,
        all_apps: &HashSet<PathId>,
        all_pods: &HashSet<PathId>,
        roots_delete: &BTreeSet<Version>,
    ) -> ScanResult {
        match self
            .try_scan_batch(roots, current, all_apps, all_pods, roots_delete)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                warn!(%error, "batch scan failed, skipping batch");
                ScanResult::default()
            }
        }
    }

    async fn try_scan_batch(
        &self,
        roots: &[RootSnapshot],
        current: &RootSnapshot,
        all_apps: &HashSet<PathId>,
        all_pods: &HashSet<PathId>,
        roots_delete: &BTreeSet<Version>,
    ) -> StoreResult<ScanResult> {
        let apps_in_use = in_use(roots, current, |root| &root.transitive_apps);
        let pods_in_use = in_use(roots, current, |root| &root.transitive_pods);

        let apps_over_cap = self.over_cap(&self.repositories.apps, &apps_in_use).await?;
        let pods_over_cap = self.over_cap(&self.repositories.pods, &pods_in_use).await?;

        let app_versions_delete = self.versions_to_delete(apps_over_cap, &apps_in_use);
        let pod_versions_delete = self.versions_to_delete(pods_over_cap, &pods_in_use);

        let apps_full_delete = all_apps
            .iter()
            .filter(|id| !apps_in_use.contains_key(*id))
            .cloned()
            .collect();
        let pods_full_delete = all_pods
            .iter()
            .filter(|id| !pods_in_use.contains_key(*id))
            .cloned()
            .collect();

        Ok(ScanResult {
            apps_full_delete,
            app_versions_delete,
            pods_full_delete,
            pod_versions_delete,
            roots_delete: roots_delete.clone(),
        })
    }

    /// Fetch full version histories for in-use definitions and keep those
    /// exceeding the cap.
    async fn over_cap(
        &self,
        repository: &Arc<dyn VersionedRepository>,
        in_use: &HashMap<PathId, BTreeSet<Version>>,
    ) -> StoreResult<HashMap<PathId, BTreeSet<Version>>> {
        let mut over_cap = HashMap::new();
        for id in in_use.keys() {
            let versions: BTreeSet<Version> = repository.versions(id).try_collect().await?;
            if versions.len() > self.max_versions {
                over_cap.insert(id.clone(), versions);
            }
        }
        Ok(over_cap)
    }

    /// Pick the oldest unreferenced versions beyond the cap for each over-cap
    /// definition.
    fn versions_to_delete(
        &self,
        over_cap: HashMap<PathId, BTreeSet<Version>>,
        in_use: &HashMap<PathId, BTreeSet<Version>>,
    ) -> HashMap<PathId, BTreeSet<Version>> {
        let mut deletes = HashMap::new();
        for (id, versions) in over_cap {
            let excess = versions.len() - self.max_versions;
            let used = in_use.get(&id);
            let candidates: BTreeSet<Version> = versions
                .iter()
                .filter(|version| used.map_or(true, |set| !set.contains(version)))
                .take(excess)
                .copied()
                .collect();
            if !candidates.is_empty() {
                deletes.insert(id, candidates);
            }
        }
        deletes
    }
}

/// Union of versions referenced by the batch roots and the current root.
fn in_use<'a>(
    roots: &'a [RootSnapshot],
    current: &'a RootSnapshot,
    pick: fn(&RootSnapshot) -> &HashMap<PathId, BTreeSet<Version>>,
) -> HashMap<PathId, BTreeSet<Version>> {
    let mut used: HashMap<PathId, BTreeSet<Version>> = HashMap::new();
    for root in roots.iter().chain(std::iter::once(current)) {
        for (id, versions) in pick(root) {
            used.entry(id.clone()).or_default().extend(versions.iter().copied());
        }
    }
    used
}
