//! Repository ports consumed by the retention core.
//!
//! Backends expose enumeration as finite, consume-once streams and point
//! reads/deletes as futures. The retention core never mutates record
//! content through these ports, only existence.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::group::{RootSnapshot, StoredPlan};
use crate::ident::{PathId, Version};

/// Errors surfaced by a repository backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Result type for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Port over a repository of versioned definitions.
///
/// Apps and pods share this shape; the retention core holds one handle for
/// each family and treats them symmetrically.
#[async_trait]
pub trait VersionedRepository: Send + Sync + 'static {
    /// Enumerate every stored definition id.
    fn ids(&self) -> BoxStream<'_, StoreResult<PathId>>;

    /// Enumerate the stored versions of one definition.
    fn versions(&self, id: &PathId) -> BoxStream<'_, StoreResult<Version>>;

    /// Delete a definition and its entire version history.
    async fn delete(&self, id: &PathId) -> StoreResult<()>;

    /// Delete a single version of a definition.
    async fn delete_version(&self, id: &PathId, version: Version) -> StoreResult<()>;
}

/// Port over the repository of root snapshots.
#[async_trait]
pub trait GroupRepository: Send + Sync + 'static {
    /// Enumerate every stored root version.
    fn root_versions(&self) -> BoxStream<'_, StoreResult<Version>>;

    /// The current root, i.e. the topology the orchestrator is acting on.
    async fn root(&self) -> StoreResult<RootSnapshot>;

    /// Load one historical root, if it still exists.
    async fn root_version(&self, version: Version) -> StoreResult<Option<RootSnapshot>>;

    /// Delete one historical root version.
    async fn delete_root_version(&self, version: Version) -> StoreResult<()>;
}

/// Port over the repository of in-flight deployment plans.
#[async_trait]
pub trait DeploymentRepository: Send + Sync + 'static {
    /// Enumerate every stored plan summary.
    fn all(&self) -> BoxStream<'_, StoreResult<StoredPlan>>;
}
