//! Snapshot model.
//!
//! A [`Snapshot`] owns an ordered, non-overlapping sequence of
//! [`SnapshotRegion`]s representing one evolving view of process memory.
//! Regions own paired current/previous byte buffers plus per-element labels
//! and validity bits; element cursors are transient views handed out by
//! iteration.

mod bitmap;
mod element;
mod label;
mod region;

pub use bitmap::ValidBitmap;
pub use element::{Element, ElementMut, IterateMode};
pub use label::{LabelWidth, ScanLabel};
pub use region::SnapshotRegion;

use crate::memory::ProcessMemory;
use anyhow::Result;
use log::{Level, debug, log_enabled, warn};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Ordered collection of memory regions captured from a process.
#[derive(Debug, Clone)]
pub struct Snapshot<L: ScanLabel = i16> {
    name: String,
    regions: Vec<SnapshotRegion<L>>,
    last_update: Option<Instant>,
}

impl<L: ScanLabel> Snapshot<L> {
    /// Build a snapshot from regions, sorting them by base address and
    /// dropping any region overlapping its predecessor.
    pub fn new(name: impl Into<String>, mut regions: Vec<SnapshotRegion<L>>) -> Self {
        regions.sort_by_key(SnapshotRegion::base_address);

        let mut ordered: Vec<SnapshotRegion<L>> = Vec::with_capacity(regions.len());
        for region in regions {
            if let Some(last) = ordered.last() {
                if region.base_address() < last.end_address() {
                    warn!(
                        "dropping overlapping region 0x{:X} - 0x{:X}",
                        region.base_address(),
                        region.end_address()
                    );
                    continue;
                }
            }
            ordered.push(region);
        }

        Self {
            name: name.into(),
            regions: ordered,
            last_update: None,
        }
    }

    /// Capture the structure of the target process as unseeded regions.
    /// Buffers hold no data until the first [`Self::read_all_memory`].
    pub fn capture(
        name: impl Into<String>,
        memory: &dyn ProcessMemory,
        element_width: usize,
        alignment: usize,
    ) -> Result<Self> {
        let regions = memory
            .regions()?
            .into_iter()
            .map(|info| SnapshotRegion::new(info.base, info.size, element_width, alignment))
            .collect();
        Ok(Self::new(name, regions))
    }

    /// Clone this snapshot under a new name for an independent scan.
    pub fn clone_for_scan(&self, name: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.name = name.into();
        clone
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag describing the fixed label width carried by every element.
    #[inline]
    pub fn label_width(&self) -> LabelWidth {
        L::WIDTH
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn element_count(&self) -> usize {
        self.regions.iter().map(SnapshotRegion::element_count).sum()
    }

    #[inline]
    pub fn regions(&self) -> &[SnapshotRegion<L>] {
        &self.regions
    }

    #[inline]
    pub fn regions_mut(&mut self) -> &mut [SnapshotRegion<L>] {
        &mut self.regions
    }

    /// Elapsed time since the last memory refresh, if any refresh happened.
    pub fn time_since_last_update(&self) -> Option<Duration> {
        self.last_update.map(|at| at.elapsed())
    }

    /// Record a refresh performed outside [`Self::read_all_memory`], as the
    /// correlator does when it fuses the read with the comparison pass.
    pub fn mark_updated(&mut self) {
        self.last_update = Some(Instant::now());
    }

    /// Refresh all regions from the live process, rotating current buffers
    /// into previous buffers. Regions are read in parallel; a region that
    /// fails its read stays in the snapshot and is simply not comparable
    /// this tick.
    pub fn read_all_memory(&mut self, memory: &dyn ProcessMemory) {
        self.regions.par_iter_mut().for_each(|region| {
            if let Err(e) = region.read_from(memory) {
                if log_enabled!(Level::Debug) {
                    debug!("{:#}", e);
                }
            }
        });
        self.mark_updated();
    }

    /// Bulk-initialize every element label.
    pub fn set_element_labels(&mut self, label: L) {
        for region in &mut self.regions {
            region.set_all_labels(label);
        }
    }

    /// Bulk-set every element validity bit.
    pub fn set_all_valid_bits(&mut self, valid: bool) {
        for region in &mut self.regions {
            region.set_all_valid(valid);
        }
    }

    /// Drop regions with zero valid elements. Empty placeholders are never
    /// retained.
    pub fn discard_invalid_regions(&mut self) {
        self.regions.retain(|region| region.valid_element_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RegionKind;
    use crate::memory::mock::MockMemory;

    #[test]
    fn regions_are_ordered_and_overlaps_dropped() {
        let regions = vec![
            SnapshotRegion::<i16>::new(0x3000, 16, 4, 4),
            SnapshotRegion::<i16>::new(0x1000, 16, 4, 4),
            SnapshotRegion::<i16>::new(0x1008, 16, 4, 4),
        ];
        let snapshot = Snapshot::new("test", regions);

        assert_eq!(snapshot.region_count(), 2);
        assert_eq!(snapshot.regions()[0].base_address(), 0x1000);
        assert_eq!(snapshot.regions()[1].base_address(), 0x3000);
    }

    #[test]
    fn capture_mirrors_process_layout_without_reading() {
        let mem = MockMemory::new();
        mem.add_region(0x1000, 32, RegionKind::Heap, None);
        mem.add_region(0x2000, 16, RegionKind::Static, Some("libgame.so"));

        let snapshot = Snapshot::<i16>::capture("capture", &mem, 4, 4).unwrap();
        assert_eq!(snapshot.region_count(), 2);
        assert_eq!(snapshot.element_count(), 8 + 4);
        assert!(snapshot.time_since_last_update().is_none());
        assert!(!snapshot.regions()[0].can_compare());
    }

    #[test]
    fn discard_invalid_regions_drops_fully_invalid_ones() {
        let mem = MockMemory::new();
        mem.add_region(0x1000, 16, RegionKind::Heap, None);
        mem.add_region(0x2000, 16, RegionKind::Heap, None);

        let mut snapshot = Snapshot::<i16>::capture("filter", &mem, 4, 4).unwrap();
        snapshot.set_all_valid_bits(false);
        snapshot.regions_mut()[1].set_valid(2, true);
        snapshot.discard_invalid_regions();

        assert_eq!(snapshot.region_count(), 1);
        assert_eq!(snapshot.regions()[0].base_address(), 0x2000);
    }

    #[test]
    fn read_all_memory_tracks_update_time_and_tolerates_bad_regions() {
        let mem = MockMemory::new();
        mem.add_region(0x1000, 16, RegionKind::Heap, None);
        mem.add_region(0x2000, 16, RegionKind::Heap, None);
        mem.set_faulty(0x2000, true);

        let mut snapshot = Snapshot::<i16>::capture("read", &mem, 4, 4).unwrap();
        snapshot.read_all_memory(&mem);
        snapshot.read_all_memory(&mem);

        assert!(snapshot.time_since_last_update().is_some());
        assert_eq!(snapshot.region_count(), 2, "unreadable region is kept");
        assert!(snapshot.regions()[0].can_compare());
        assert!(!snapshot.regions()[1].can_compare());
    }

    #[test]
    fn label_width_tag_follows_type_parameter() {
        let snapshot = Snapshot::<i64>::new("tag", Vec::new());
        assert_eq!(snapshot.label_width(), LabelWidth::I64);
        assert_eq!(snapshot.label_width().to_string(), "i64");
    }
}
