//! # caravel-gc
//!
//! Retention and garbage-collection core for the Caravel configuration store.
//!
//! This crate provides:
//! - A coordinator state machine: Resting, ReadyForGc, Scanning, Compacting
//! - A scan engine computing candidate deletion sets against the repositories
//! - A compact engine executing deletions while arbitrating concurrent writes
//! - Per-cycle bookkeeping of tracked and blocked writes
//!
//! ## Architecture
//!
//! The collector enforces a configurable cap on stored root versions and on
//! per-app / per-pod version history while never deleting anything still
//! transitively referenced by the current root or an in-flight deployment
//! plan. One coordinator task serializes all messages; scans and compactions
//! run as background tasks that report back through the mailbox. Writers
//! announce stores through a [`GcHandle`] and are acknowledged immediately,
//! except during a compaction that is deleting the very records they wrote,
//! in which case the acknowledgement is held until the compaction finishes.
//!
//! Collection is best effort: scan and compact errors are logged and
//! swallowed, and anything missed this cycle is discovered again by the
//! next one.
//!
//! ## Example
//!
//! ```rust,ignore
//! use caravel_gc::{GcConfigBuilder, GcCoordinator, Repositories};
//!
//! let config = GcConfigBuilder::new().max_versions(5).build();
//! let handle = GcCoordinator::spawn(config, repositories);
//!
//! // Writers announce stores and await admission.
//! handle.store_app("/prod/web".into(), Some(version)).await?;
//!
//! // Something above decides when to collect.
//! handle.run_gc().await?;
//! ```

mod bookkeeping;
mod compact;
mod config;
mod coordinator;
mod message;
mod scan;

pub use bookkeeping::{BlockedWrites, TrackedWrites};
pub use config::{GcConfig, GcConfigBuilder};
pub use coordinator::{
    GcCoordinator, GcError, GcHandle, GcResult, GcStats, Repositories, COMPACTION_DURATION_METRIC,
    GC_RUNS_METRIC, SCAN_DURATION_METRIC,
};
pub use scan::ScanResult;
