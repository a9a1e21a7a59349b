//! Compact phase: execute the effective deletion set.
//!
//! Deletions run one at a time per stage, cheapest-to-replay stages first:
//! full apps, app versions, full pods, pod versions, then roots. Individual
//! failures are logged and skipped; a record missed this cycle is discovered
//! again by the next scan.

use caravel_store::{GroupRepository, VersionedRepository};
use tracing::{debug, warn};

use crate::coordinator::Repositories;
use crate::scan::ScanResult;

/// The compact engine for one collection cycle.
pub(crate) struct Compactor {
    repositories: Repositories,
}

impl Compactor {
    pub fn new(repositories: Repositories) -> Self {
        Compactor { repositories }
    }

    /// Execute every deletion in the set.
    pub async fn run(&self, deletes: ScanResult) {
        for id in &deletes.apps_full_delete {
            if let Err(error) = self.repositories.apps.delete(id).await {
                warn!(%error, %id, "failed to delete app");
            }
        }

        for (id, versions) in &deletes.app_versions_delete {
            for version in versions {
                if let Err(error) = self.repositories.apps.delete_version(id, *version).await {
                    warn!(%error, %id, %version, "failed to delete app version");
                }
            }
        }

        for id in &deletes.pods_full_delete {
            if let Err(error) = self.repositories.pods.delete(id).await {
                warn!(%error, %id, "failed to delete pod");
            }
        }

        for (id, versions) in &deletes.pod_versions_delete {
            for version in versions {
                if let Err(error) = self.repositories.pods.delete_version(id, *version).await {
                    warn!(%error, %id, %version, "failed to delete pod version");
                }
            }
        }

        for version in &deletes.roots_delete {
            if let Err(error) = self.repositories.groups.delete_root_version(*version).await {
                warn!(%error, %version, "failed to delete root version");
            }
        }

        debug!(deletions = deletes.delete_count(), "compaction pass finished");
    }
}
