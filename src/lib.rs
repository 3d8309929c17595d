//! Snapshot-based process memory analysis engine.
//!
//! Captures snapshots of a target process's readable memory, correlates
//! element value changes against user input activity, and discovers pointer
//! chains toward a target address.
//!
//! # Architecture
//!
//! - [`snapshot`]: regions, element iteration, per-element labels and
//!   validity bits. Label width is a compile-time choice via [`ScanLabel`].
//! - [`memory`]: the [`ProcessMemory`] access trait, region enumeration,
//!   and the Linux `process_vm_readv` backend.
//! - [`task`]: trackable tasks with progress reporting and cooperative
//!   cancellation.
//! - [`sched`]: drives repeated scans on a tick interval, gated on
//!   engine capabilities.
//! - [`correlator`]: the input correlation scan, adjusting labels by
//!   recency of input activity.
//! - [`pointer_scan`]: one-shot pointer discovery pipeline producing
//!   per-level candidate snapshots.

pub mod config;
pub mod correlator;
pub mod input;
pub mod memory;
pub mod pointer_scan;
pub mod repository;
pub mod sched;
pub mod snapshot;
pub mod task;

pub use config::{ScanSettings, SettingsProvider};
pub use memory::{Bitness, ProcessMemory, RegionInfo, RegionKind};
pub use snapshot::{LabelWidth, ScanLabel, Snapshot, SnapshotRegion};
pub use task::{TaskOutcome, TrackableTask};
