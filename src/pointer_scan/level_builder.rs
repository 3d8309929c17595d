//! Level building.
//!
//! Level 0 holds the pointer candidates whose value lies inside the target
//! window; level k+1 holds the candidates whose value lies inside the radius
//! window around any element discovered at level k. Each level is
//! materialized as its own snapshot and the result is the ordered level
//! list. Cancellation between levels discards everything built so far.

use super::collector::PointerCandidate;
use crate::snapshot::{ScanLabel, Snapshot, SnapshotRegion};
use crate::task::TaskProgress;
use log::{Level, debug, log_enabled};

/// Build the ordered level snapshots. `candidates` must be sorted by
/// address. Returns `None` when cancellation was observed; partial levels
/// are never returned.
pub fn build_levels<L, C>(
    candidates: &[PointerCandidate],
    target: &Snapshot<L>,
    radius: u32,
    depth: u32,
    pointer_width: usize,
    alignment: usize,
    progress: &TaskProgress,
    check_cancelled: &C,
) -> Option<Vec<Snapshot<L>>>
where
    L: ScanLabel,
    C: Fn() -> bool,
{
    let total_levels = u64::from(depth) + 1;
    let window = match target.regions().first() {
        Some(region) => (region.base_address(), region.end_address()),
        None => return Some(Vec::new()),
    };

    let mut levels: Vec<Snapshot<L>> = Vec::new();
    let mut current: Vec<PointerCandidate> = candidates
        .iter()
        .filter(|candidate| candidate.value >= window.0 && candidate.value < window.1)
        .copied()
        .collect();

    for level_index in 0..=depth {
        if check_cancelled() {
            return None;
        }
        if current.is_empty() {
            break;
        }

        if log_enabled!(Level::Debug) {
            debug!("pointer level {}: {} candidates", level_index, current.len());
        }

        levels.push(materialize_level(
            format!("pointer level {level_index}"),
            &current,
            pointer_width,
            alignment,
        ));
        progress.publish(u64::from(level_index) + 1, total_levels);

        if level_index == depth {
            break;
        }

        // Addresses of this level, already sorted because the candidate
        // list is sorted and filtering preserves order.
        let addresses: Vec<u64> = current.iter().map(|c| c.address).collect();
        current = candidates
            .iter()
            .filter(|candidate| targets_any_window(&addresses, candidate.value, radius))
            .copied()
            .collect();
    }

    progress.publish(total_levels, total_levels);
    Some(levels)
}

/// True when `value` lies within `radius` bytes of any address in the
/// sorted `addresses` slice.
fn targets_any_window(addresses: &[u64], value: u64, radius: u32) -> bool {
    let low = value.saturating_sub(u64::from(radius));
    let idx = addresses.partition_point(|&address| address < low);
    idx < addresses.len() && addresses[idx] <= value.saturating_add(u64::from(radius))
}

/// Materialize one level as a snapshot of pointer-sized elements.
///
/// Candidates within one pointer width of each other share a region so no
/// two regions ever overlap; within a region, elements sit at the scan
/// alignment stride and the validity bits mark exactly the candidate
/// offsets. Every candidate of the level is represented.
fn materialize_level<L: ScanLabel>(
    name: String,
    level: &[PointerCandidate],
    pointer_width: usize,
    alignment: usize,
) -> Snapshot<L> {
    let width = pointer_width as u64;
    let mut regions: Vec<SnapshotRegion<L>> = Vec::new();
    let mut i = 0usize;
    while i < level.len() {
        let start = i;
        while i + 1 < level.len() && level[i + 1].address - level[i].address <= width {
            i += 1;
        }

        let run = &level[start..=i];
        let base = run[0].address;
        let size = (run[run.len() - 1].address + width - base) as usize;
        let mut bytes = vec![0u8; size];
        for candidate in run {
            let offset = (candidate.address - base) as usize;
            bytes[offset..offset + pointer_width]
                .copy_from_slice(&candidate.value.to_le_bytes()[..pointer_width]);
        }

        let mut region = SnapshotRegion::from_bytes(base, bytes, pointer_width, alignment);
        region.set_all_valid(false);
        for candidate in run {
            region.set_valid((candidate.address - base) as usize / alignment, true);
        }
        regions.push(region);
        i += 1;
    }

    Snapshot::new(name, regions)
}
