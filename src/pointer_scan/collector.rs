//! Pointer candidate collection.
//!
//! Scans module-backed (static) or heap-classified regions for values that
//! are plausibly pointers: correctly aligned, non-null and landing inside
//! the mapped address space of the target process. Static and heap
//! collection are independent sub-scans; the pipeline runs them
//! concurrently.

use crate::memory::{ProcessMemory, RegionInfo, RegionKind};
use anyhow::Result;
use log::{Level, debug, log_enabled};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// A pointer-sized value and the address it was found at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerCandidate {
    pub address: u64,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    /// Module-backed, non-heap regions.
    Static,
    /// Heap-classified regions.
    Heap,
}

/// Collect pointer candidates from all regions of the requested kind.
///
/// Regions are processed in parallel, one worker per region; a region that
/// fails its read is skipped. Returns `None` when cancellation was observed.
pub fn collect_pointers<C>(
    memory: &dyn ProcessMemory,
    kind: CollectorKind,
    alignment: usize,
    check_cancelled: &C,
) -> Result<Option<Vec<PointerCandidate>>>
where
    C: Fn() -> bool + Sync,
{
    let all = memory.regions()?;
    let pointer_width = memory.bitness().pointer_width();

    // Sorted bounds of the whole mapped space; a plausible pointer value
    // must land inside one of them.
    let mut bounds: Vec<(u64, u64)> = all.iter().map(|r| (r.base, r.end())).collect();
    bounds.sort_unstable();

    let targets: Vec<&RegionInfo> = all
        .iter()
        .filter(|region| match kind {
            CollectorKind::Static => region.kind == RegionKind::Static,
            CollectorKind::Heap => region.kind == RegionKind::Heap,
        })
        .collect();

    let cancelled = AtomicBool::new(false);
    let mut candidates: Vec<PointerCandidate> = targets
        .par_iter()
        .take_any_while(|_| {
            if check_cancelled() {
                cancelled.store(true, Ordering::Relaxed);
            }
            !cancelled.load(Ordering::Relaxed)
        })
        .flat_map(|region| scan_region(memory, region, pointer_width, alignment, &bounds))
        .collect();

    if cancelled.load(Ordering::Relaxed) {
        return Ok(None);
    }

    candidates.par_sort_unstable_by_key(|candidate| candidate.address);

    if log_enabled!(Level::Debug) {
        debug!(
            "{:?} collection: {} regions scanned, {} candidates",
            kind,
            targets.len(),
            candidates.len()
        );
    }

    Ok(Some(candidates))
}

fn scan_region(
    memory: &dyn ProcessMemory,
    region: &RegionInfo,
    pointer_width: usize,
    alignment: usize,
    bounds: &[(u64, u64)],
) -> Vec<PointerCandidate> {
    let mut buf = vec![0u8; region.size];
    if let Err(e) = memory.read(region.base, &mut buf) {
        if log_enabled!(Level::Debug) {
            debug!("skipping unreadable region 0x{:X}: {:#}", region.base, e);
        }
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset + pointer_width <= buf.len() {
        let value = decode_pointer(&buf[offset..offset + pointer_width]);
        if is_plausible_pointer(value, alignment, bounds) {
            out.push(PointerCandidate {
                address: region.base + offset as u64,
                value,
            });
        }
        offset += alignment;
    }
    out
}

#[inline]
fn decode_pointer(bytes: &[u8]) -> u64 {
    match bytes.len() {
        4 => u64::from(u32::from_le_bytes(bytes.try_into().expect("width checked"))),
        _ => u64::from_le_bytes(bytes.try_into().expect("width checked")),
    }
}

#[inline]
fn is_plausible_pointer(value: u64, alignment: usize, bounds: &[(u64, u64)]) -> bool {
    value != 0 && value % alignment as u64 == 0 && in_mapped_space(bounds, value)
}

fn in_mapped_space(bounds: &[(u64, u64)], value: u64) -> bool {
    let idx = bounds.partition_point(|&(base, _)| base <= value);
    idx > 0 && value < bounds[idx - 1].1
}
