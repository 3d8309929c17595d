//! Pointer-discovery pipeline.
//!
//! One-shot, multi-stage discovery of pointer chains toward a target
//! address:
//!
//! 1. Build a target micro-snapshot spanning the radius window around the
//!    target address.
//! 2. Collect static pointer candidates from module-backed regions.
//! 3. Collect heap pointer candidates, concurrently with step 2.
//! 4. Build indirection levels breadth-first; each level is its own
//!    snapshot and the pipeline result is the ordered level list.
//!
//! Chain assembly from the level snapshots is a downstream stage and is not
//! part of this pipeline. The whole pipeline runs as one trackable task;
//! cancellation at any stage boundary or any internal failure yields no
//! result, never a fault across the task boundary.

mod collector;
mod level_builder;

pub use collector::{CollectorKind, PointerCandidate, collect_pointers};
pub use level_builder::build_levels;

use crate::memory::ProcessMemory;
use crate::snapshot::{ScanLabel, Snapshot, SnapshotRegion};
use crate::task::{TaskOutcome, TrackableTask};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;

const SCAN_NAME: &str = "pointer scan";

#[derive(Debug, Clone, Copy)]
pub struct PointerScanParams {
    /// Address to discover pointer chains toward.
    pub target_address: u64,
    /// Byte window treated as "points at target".
    pub radius: u32,
    /// Maximum indirection depth.
    pub depth: u32,
    /// Pointer alignment in bytes.
    pub alignment: usize,
}

/// Micro-snapshot spanning `[target - radius, target + radius]`,
/// width-padded to the pointer granularity in use.
fn build_target_snapshot<L: ScanLabel>(
    params: &PointerScanParams,
    pointer_width: usize,
) -> Snapshot<L> {
    let base = params.target_address.saturating_sub(u64::from(params.radius));
    let span = u64::from(params.radius) * 2;
    let width = pointer_width as u64;
    let padded = span + (width - span % width);
    Snapshot::new(
        format!("{SCAN_NAME} target"),
        vec![SnapshotRegion::new(
            base,
            padded as usize,
            pointer_width,
            pointer_width,
        )],
    )
}

/// Start a pointer scan as a trackable task. The outcome carries the
/// ordered level snapshots; a cancelled or failed pipeline carries nothing.
pub fn scan<L: ScanLabel>(
    memory: Arc<dyn ProcessMemory>,
    runtime: &tokio::runtime::Handle,
    params: PointerScanParams,
) -> TrackableTask<Vec<Snapshot<L>>> {
    TrackableTask::spawn(SCAN_NAME, runtime, move |ctx| async move {
        if ctx.is_cancelled() {
            warn!("{} cancelled before start", SCAN_NAME);
            return TaskOutcome::Cancelled;
        }

        let started = Instant::now();
        let pointer_width = memory.bitness().pointer_width();
        let target = build_target_snapshot::<L>(&params, pointer_width);

        // Static and heap collection run concurrently; the level builder
        // waits on both.
        let static_memory = Arc::clone(&memory);
        let static_ctx = ctx.clone();
        let static_task = tokio::task::spawn_blocking(move || {
            collect_pointers(&*static_memory, CollectorKind::Static, params.alignment, &|| {
                static_ctx.is_cancelled()
            })
        });

        let heap_memory = Arc::clone(&memory);
        let heap_ctx = ctx.clone();
        let heap_task = tokio::task::spawn_blocking(move || {
            collect_pointers(&*heap_memory, CollectorKind::Heap, params.alignment, &|| {
                heap_ctx.is_cancelled()
            })
        });

        let (static_result, heap_result) = tokio::join!(static_task, heap_task);

        let statics = match unwrap_collection(static_result, "static") {
            Ok(Some(candidates)) => candidates,
            Ok(None) => return TaskOutcome::Cancelled,
            Err(()) => return TaskOutcome::Failed,
        };
        let heaps = match unwrap_collection(heap_result, "heap") {
            Ok(Some(candidates)) => candidates,
            Ok(None) => return TaskOutcome::Cancelled,
            Err(()) => return TaskOutcome::Failed,
        };

        if ctx.is_cancelled() {
            warn!("{} cancelled after pointer collection", SCAN_NAME);
            return TaskOutcome::Cancelled;
        }

        let mut candidates = statics;
        candidates.extend(heaps);
        candidates.sort_unstable_by_key(|candidate| candidate.address);

        match build_levels(
            &candidates,
            &target,
            params.radius,
            params.depth,
            pointer_width,
            params.alignment,
            ctx.progress(),
            &|| ctx.is_cancelled(),
        ) {
            Some(levels) => {
                info!(
                    "{} complete in {:?}: {} candidates, {} levels",
                    SCAN_NAME,
                    started.elapsed(),
                    candidates.len(),
                    levels.len()
                );
                TaskOutcome::Completed(levels)
            }
            None => {
                warn!("{} cancelled during level building", SCAN_NAME);
                TaskOutcome::Cancelled
            }
        }
    })
}

type CollectionResult =
    Result<anyhow::Result<Option<Vec<PointerCandidate>>>, tokio::task::JoinError>;

/// Fold a collector join result into candidates, a cancellation, or a
/// logged failure.
fn unwrap_collection(
    result: CollectionResult,
    which: &str,
) -> Result<Option<Vec<PointerCandidate>>, ()> {
    match result {
        Ok(Ok(Some(candidates))) => Ok(Some(candidates)),
        Ok(Ok(None)) => {
            warn!("{} cancelled during {} collection", SCAN_NAME, which);
            Ok(None)
        }
        Ok(Err(e)) => {
            error!("{} collection failed: {:#}", which, e);
            Err(())
        }
        Err(e) => {
            error!("{} collection panicked: {}", which, e);
            Err(())
        }
    }
}
