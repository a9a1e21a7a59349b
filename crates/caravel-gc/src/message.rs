//! Messages flowing through the coordinator mailbox.

use caravel_store::{PathId, Plan, RootSnapshot, Version};
use tokio::sync::oneshot;

use crate::coordinator::GcStats;
use crate::scan::ScanResult;

/// One-shot completion handle held by a writer awaiting acknowledgement.
pub(crate) type Ack = oneshot::Sender<()>;

/// Everything the coordinator accepts through its mailbox.
///
/// Store messages announce a write that the sender has performed (or is
/// performing) against the repositories; the paired [`Ack`] resolves when the
/// collector admits the write. `WakeUp`, `ScanDone`, and `CompactDone` are
/// internal, produced by the timer and the background phase tasks.
pub(crate) enum GcMessage {
    /// External trigger to run a collection cycle.
    RunGc,

    /// Internal timer tick ending the resting phase.
    WakeUp,

    /// A writer stored an app (a single version, or the definition itself).
    StoreApp {
        id: PathId,
        version: Option<Version>,
        ack: Ack,
    },

    /// A writer stored a pod.
    StorePod {
        id: PathId,
        version: Option<Version>,
        ack: Ack,
    },

    /// A writer stored a root snapshot.
    StoreRoot { root: RootSnapshot, ack: Ack },

    /// A writer stored a deployment plan.
    StorePlan { plan: Plan, ack: Ack },

    /// The scan task finished.
    ScanDone(ScanResult),

    /// The compact task finished.
    CompactDone,

    /// Snapshot request for cycle statistics.
    Stats(oneshot::Sender<GcStats>),
}
