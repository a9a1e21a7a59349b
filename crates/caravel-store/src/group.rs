//! Root snapshots and deployment plans.
//!
//! A root snapshot captures the entire deployable topology at one version,
//! transitively naming every (app, version) and (pod, version) pair it
//! deploys. A plan pairs two roots for an in-flight change. Both are
//! immutable once stored.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::ident::{PathId, Version};

/// A snapshot of the full deployable topology at a single version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSnapshot {
    /// Version of this root.
    pub version: Version,

    /// App versions this root transitively deploys.
    pub transitive_apps: HashMap<PathId, BTreeSet<Version>>,

    /// Pod versions this root transitively deploys.
    pub transitive_pods: HashMap<PathId, BTreeSet<Version>>,
}

impl RootSnapshot {
    /// Create an empty root at the given version.
    pub fn new(version: Version) -> Self {
        RootSnapshot {
            version,
            transitive_apps: HashMap::new(),
            transitive_pods: HashMap::new(),
        }
    }

    /// Add a referenced app version.
    pub fn with_app(mut self, id: impl Into<PathId>, version: Version) -> Self {
        self.transitive_apps
            .entry(id.into())
            .or_default()
            .insert(version);
        self
    }

    /// Add a referenced pod version.
    pub fn with_pod(mut self, id: impl Into<PathId>, version: Version) -> Self {
        self.transitive_pods
            .entry(id.into())
            .or_default()
            .insert(version);
        self
    }

    /// Whether this root references the given app version.
    pub fn references_app(&self, id: &PathId, version: Version) -> bool {
        self.transitive_apps
            .get(id)
            .is_some_and(|versions| versions.contains(&version))
    }

    /// Whether this root references the given pod version.
    pub fn references_pod(&self, id: &PathId, version: Version) -> bool {
        self.transitive_pods
            .get(id)
            .is_some_and(|versions| versions.contains(&version))
    }
}

/// An in-flight change from one root to another.
///
/// A stored plan pins both of its roots, and transitively everything those
/// roots deploy, until the plan itself is removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Identifier of the deployment this plan drives.
    pub id: String,

    /// The topology the change starts from.
    pub original: RootSnapshot,

    /// The topology the change moves to.
    pub target: RootSnapshot,
}

impl Plan {
    pub fn new(id: impl Into<String>, original: RootSnapshot, target: RootSnapshot) -> Self {
        Plan {
            id: id.into(),
            original,
            target,
        }
    }

    /// The stored summary of this plan.
    pub fn summary(&self) -> StoredPlan {
        StoredPlan {
            id: self.id.clone(),
            original_version: self.original.version,
            target_version: self.target.version,
        }
    }
}

/// The persisted form of a plan: root versions only.
///
/// Full roots are rehydrated on demand through the group repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPlan {
    pub id: String,
    pub original_version: Version,
    pub target_version: Version,
}
