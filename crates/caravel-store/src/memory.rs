//! In-memory repository implementations.
//!
//! These are fully concurrent fakes rather than mocks: writers and the
//! retention core can exercise the same instance simultaneously. They back
//! the test suites, the demo app, and the stress harness.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;

use crate::group::{Plan, RootSnapshot, StoredPlan};
use crate::ident::{PathId, Version};
use crate::repository::{
    DeploymentRepository, GroupRepository, StoreError, StoreResult, VersionedRepository,
};

/// In-memory repository of versioned definitions (apps or pods).
#[derive(Clone, Default)]
pub struct MemoryVersionedRepository {
    inner: Arc<RwLock<HashMap<PathId, BTreeSet<Version>>>>,
}

impl MemoryVersionedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one version of a definition (the writer side of the port).
    pub fn put_version(&self, id: impl Into<PathId>, version: Version) {
        self.inner.write().entry(id.into()).or_default().insert(version);
    }

    /// Whether the definition exists at all.
    pub fn contains(&self, id: &PathId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Snapshot of one definition's stored versions.
    pub fn versions_of(&self, id: &PathId) -> BTreeSet<Version> {
        self.inner.read().get(id).cloned().unwrap_or_default()
    }

    /// Number of stored definitions.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VersionedRepository for MemoryVersionedRepository {
    fn ids(&self) -> BoxStream<'_, StoreResult<PathId>> {
        let ids: Vec<_> = self.inner.read().keys().cloned().map(Ok).collect();
        stream::iter(ids).boxed()
    }

    fn versions(&self, id: &PathId) -> BoxStream<'_, StoreResult<Version>> {
        let versions: Vec<_> = self
            .inner
            .read()
            .get(id)
            .map(|set| set.iter().copied().map(Ok).collect())
            .unwrap_or_default();
        stream::iter(versions).boxed()
    }

    async fn delete(&self, id: &PathId) -> StoreResult<()> {
        if self.inner.write().remove(id).is_some() {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    async fn delete_version(&self, id: &PathId, version: Version) -> StoreResult<()> {
        let removed = match self.inner.write().get_mut(id) {
            Some(versions) => versions.remove(&version),
            None => false,
        };
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{}@{}", id, version)))
        }
    }
}

#[derive(Default)]
struct GroupState {
    roots: BTreeMap<Version, RootSnapshot>,
    current: Option<Version>,
}

/// In-memory repository of root snapshots.
#[derive(Clone, Default)]
pub struct MemoryGroupRepository {
    inner: Arc<RwLock<GroupState>>,
}

impl MemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a root and make it the current root.
    pub fn put_root(&self, root: RootSnapshot) {
        let mut state = self.inner.write();
        state.current = Some(root.version);
        state.roots.insert(root.version, root);
    }

    /// Store a historical root without touching the current pointer.
    pub fn put_root_version(&self, root: RootSnapshot) {
        self.inner.write().roots.insert(root.version, root);
    }

    /// Number of stored root versions.
    pub fn root_count(&self) -> usize {
        self.inner.read().roots.len()
    }

    /// Whether a root version is still stored.
    pub fn contains_version(&self, version: Version) -> bool {
        self.inner.read().roots.contains_key(&version)
    }

    /// Snapshot of the stored root versions, oldest first.
    pub fn stored_versions(&self) -> Vec<Version> {
        self.inner.read().roots.keys().copied().collect()
    }
}

#[async_trait]
impl GroupRepository for MemoryGroupRepository {
    fn root_versions(&self) -> BoxStream<'_, StoreResult<Version>> {
        let versions: Vec<_> = self.inner.read().roots.keys().copied().map(Ok).collect();
        stream::iter(versions).boxed()
    }

    async fn root(&self) -> StoreResult<RootSnapshot> {
        let state = self.inner.read();
        let version = state
            .current
            .ok_or_else(|| StoreError::NotFound("current root".to_string()))?;
        state
            .roots
            .get(&version)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("root {}", version)))
    }

    async fn root_version(&self, version: Version) -> StoreResult<Option<RootSnapshot>> {
        Ok(self.inner.read().roots.get(&version).cloned())
    }

    async fn delete_root_version(&self, version: Version) -> StoreResult<()> {
        if self.inner.write().roots.remove(&version).is_some() {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("root {}", version)))
        }
    }
}

/// In-memory repository of deployment plans.
#[derive(Clone, Default)]
pub struct MemoryDeploymentRepository {
    inner: Arc<RwLock<HashMap<String, StoredPlan>>>,
}

impl MemoryDeploymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a plan's summary.
    pub fn put_plan(&self, plan: &Plan) {
        self.inner.write().insert(plan.id.clone(), plan.summary());
    }

    /// Remove a plan once its deployment completes.
    pub fn remove_plan(&self, id: &str) -> bool {
        self.inner.write().remove(id).is_some()
    }

    /// Number of stored plans.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeploymentRepository for MemoryDeploymentRepository {
    fn all(&self) -> BoxStream<'_, StoreResult<StoredPlan>> {
        let plans: Vec<_> = self.inner.read().values().cloned().map(Ok).collect();
        stream::iter(plans).boxed()
    }
}
