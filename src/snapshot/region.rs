use super::bitmap::ValidBitmap;
use super::element::{Element, ElementMut, IterateMode};
use super::label::ScanLabel;
use crate::memory::ProcessMemory;
use anyhow::{Context, Result, anyhow};

/// A contiguous span of captured process memory.
///
/// Carries paired current/previous byte buffers (same length, same base
/// address), a per-element label array and a per-element validity bitmap.
/// Buffers only ever change through [`SnapshotRegion::read_from`]; the first
/// successful read seeds the current buffer and later reads rotate it into
/// the previous buffer.
#[derive(Debug, Clone)]
pub struct SnapshotRegion<L: ScanLabel> {
    base_address: u64,
    element_width: usize,
    alignment: usize,
    current: Vec<u8>,
    previous: Option<Vec<u8>>,
    labels: Vec<L>,
    valid: ValidBitmap,
    /// True once the current buffer holds real data.
    has_current: bool,
    /// Whether the most recent read attempt succeeded. A region that failed
    /// its read is not comparable for that tick only.
    read_ok: bool,
}

impl<L: ScanLabel> SnapshotRegion<L> {
    /// Create an unseeded region. The first read fills the current buffer;
    /// no comparison is possible until a second read rotates it.
    pub fn new(base_address: u64, size: usize, element_width: usize, alignment: usize) -> Self {
        debug_assert!(element_width > 0 && alignment > 0);
        let element_count = Self::element_count_for(size, element_width, alignment);
        Self {
            base_address,
            element_width,
            alignment,
            current: vec![0u8; size],
            previous: None,
            labels: vec![L::zero(); element_count],
            valid: ValidBitmap::new(element_count, true),
            has_current: false,
            read_ok: false,
        }
    }

    /// Create a region pre-seeded with captured bytes, as the pointer
    /// pipeline does when materializing candidate levels.
    pub fn from_bytes(base_address: u64, bytes: Vec<u8>, element_width: usize, alignment: usize) -> Self {
        let mut region = Self::new(base_address, bytes.len(), element_width, alignment);
        region.current = bytes;
        region.has_current = true;
        region.read_ok = true;
        region
    }

    fn element_count_for(size: usize, element_width: usize, alignment: usize) -> usize {
        if size >= element_width {
            (size - element_width) / alignment + 1
        } else {
            0
        }
    }

    #[inline]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    #[inline]
    pub fn end_address(&self) -> u64 {
        self.base_address + self.current.len() as u64
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.current.len()
    }

    #[inline]
    pub fn element_width(&self) -> usize {
        self.element_width
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn element_count(&self) -> usize {
        self.labels.len()
    }

    /// Address of the element at `index`.
    #[inline]
    pub fn element_address(&self, index: usize) -> u64 {
        self.base_address + (index * self.alignment) as u64
    }

    /// Refresh the current buffer from the live process, rotating the old
    /// current buffer into the previous buffer.
    ///
    /// A failed read leaves both buffers untouched and marks the region
    /// not-comparable until the next successful read.
    pub fn read_from(&mut self, memory: &dyn ProcessMemory) -> Result<()> {
        let mut fresh = vec![0u8; self.current.len()];
        match memory.read(self.base_address, &mut fresh) {
            Ok(()) => {
                if self.has_current {
                    self.previous = Some(std::mem::replace(&mut self.current, fresh));
                } else {
                    self.current = fresh;
                    self.has_current = true;
                }
                self.read_ok = true;
                Ok(())
            }
            Err(e) => {
                self.read_ok = false;
                Err(e).with_context(|| {
                    format!(
                        "failed to read region 0x{:X} - 0x{:X}",
                        self.base_address,
                        self.end_address()
                    )
                })
            }
        }
    }

    /// True only once the region has completed at least one prior successful
    /// read and the latest read also succeeded. The first tick on a fresh
    /// region is never comparable.
    #[inline]
    pub fn can_compare(&self) -> bool {
        self.read_ok && self.has_current && self.previous.is_some()
    }

    /// Current bytes of the element at `index`.
    #[inline]
    pub fn element_bytes(&self, index: usize) -> &[u8] {
        let offset = index * self.alignment;
        &self.current[offset..offset + self.element_width]
    }

    /// Previous bytes of the element at `index`, if a prior read exists.
    #[inline]
    pub fn element_previous_bytes(&self, index: usize) -> Option<&[u8]> {
        let offset = index * self.alignment;
        self.previous
            .as_deref()
            .map(|prev| &prev[offset..offset + self.element_width])
    }

    /// Raw byte comparison at the declared element width. No type coercion.
    #[inline]
    pub fn element_changed(&self, index: usize) -> bool {
        match self.element_previous_bytes(index) {
            Some(previous) => self.element_bytes(index) != previous,
            None => false,
        }
    }

    #[inline]
    pub fn label(&self, index: usize) -> L {
        self.labels[index]
    }

    #[inline]
    pub fn set_label(&mut self, index: usize, label: L) {
        self.labels[index] = label;
    }

    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index)
    }

    #[inline]
    pub fn set_valid(&mut self, index: usize, valid: bool) {
        self.valid.set(index, valid);
    }

    pub fn set_all_labels(&mut self, label: L) {
        self.labels.fill(label);
    }

    pub fn set_all_valid(&mut self, valid: bool) {
        self.valid.set_all(valid);
    }

    /// Number of elements still marked valid.
    pub fn valid_element_count(&self) -> usize {
        self.valid.count_set()
    }

    /// Lazy, restartable traversal of element cursors.
    ///
    /// `ValuesAndLabels` yields elements only when the region is comparable
    /// this tick; `LabelsOnly` always yields and skips value access.
    pub fn elements(&self, mode: IterateMode) -> impl Iterator<Item = Element<'_, L>> {
        let count = match mode {
            IterateMode::ValuesAndLabels if !self.can_compare() => 0,
            _ => self.element_count(),
        };
        (0..count).map(move |index| Element::new(self, index))
    }

    /// Mutable element traversal. Same mode semantics as [`Self::elements`].
    pub fn for_each_element_mut<F>(&mut self, mode: IterateMode, mut f: F)
    where
        F: FnMut(&mut ElementMut<'_, L>),
    {
        let count = match mode {
            IterateMode::ValuesAndLabels if !self.can_compare() => 0,
            _ => self.element_count(),
        };
        for index in 0..count {
            let mut element = ElementMut::new(self, index);
            f(&mut element);
        }
    }

    /// Interpret the element at `index` as a little-endian pointer of the
    /// declared element width.
    pub fn element_as_pointer(&self, index: usize) -> Result<u64> {
        let bytes = self.element_bytes(index);
        match bytes.len() {
            4 => Ok(u64::from(u32::from_le_bytes(bytes.try_into()?))),
            8 => Ok(u64::from_le_bytes(bytes.try_into()?)),
            width => Err(anyhow!("element width {} is not a pointer width", width)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::mock::MockMemory;
    use crate::memory::RegionKind;

    fn region_with_memory() -> (MockMemory, SnapshotRegion<i16>) {
        let mem = MockMemory::new();
        mem.add_region(0x1000, 16, RegionKind::Heap, None);
        let region = SnapshotRegion::<i16>::new(0x1000, 16, 4, 4);
        (mem, region)
    }

    #[test]
    fn fresh_region_is_never_comparable_on_first_tick() {
        let (mem, mut region) = region_with_memory();
        assert!(!region.can_compare());

        region.read_from(&mem).unwrap();
        assert!(!region.can_compare(), "single read must not enable comparison");
        assert_eq!(region.elements(IterateMode::ValuesAndLabels).count(), 0);
        assert_eq!(region.elements(IterateMode::LabelsOnly).count(), 4);
    }

    #[test]
    fn second_read_rotates_buffers_and_detects_changes() {
        let (mem, mut region) = region_with_memory();
        mem.write_u32(0x1000, 0x11).unwrap();
        region.read_from(&mem).unwrap();

        mem.write_u32(0x1000, 0x22).unwrap();
        region.read_from(&mem).unwrap();

        assert!(region.can_compare());
        assert!(region.element_changed(0));
        assert!(!region.element_changed(1));
        assert_eq!(region.element_previous_bytes(0).unwrap(), &0x11u32.to_le_bytes());
        assert_eq!(region.element_bytes(0), &0x22u32.to_le_bytes());
    }

    #[test]
    fn failed_read_disables_comparison_for_that_tick_only() {
        let (mem, mut region) = region_with_memory();
        region.read_from(&mem).unwrap();
        region.read_from(&mem).unwrap();
        assert!(region.can_compare());

        mem.set_faulty(0x1000, true);
        assert!(region.read_from(&mem).is_err());
        assert!(!region.can_compare());

        // Next successful read re-enables comparison.
        mem.set_faulty(0x1000, false);
        region.read_from(&mem).unwrap();
        assert!(region.can_compare());
    }

    #[test]
    fn label_array_length_matches_element_count() {
        let region = SnapshotRegion::<i16>::new(0x1000, 16, 4, 4);
        assert_eq!(region.element_count(), 4);

        // Overlapping elements when alignment is finer than the width.
        let region = SnapshotRegion::<i16>::new(0x1000, 16, 4, 2);
        assert_eq!(region.element_count(), 7);

        // Too small to hold a single element.
        let region = SnapshotRegion::<i16>::new(0x1000, 2, 4, 4);
        assert_eq!(region.element_count(), 0);
    }

    #[test]
    fn pointer_decoding_respects_element_width() {
        let bytes = 0xDEADBEEF_u32.to_le_bytes().to_vec();
        let region = SnapshotRegion::<i16>::from_bytes(0x1000, bytes, 4, 4);
        assert_eq!(region.element_as_pointer(0).unwrap(), 0xDEADBEEF);

        let bytes = 0x7FFF_0000_1000_u64.to_le_bytes().to_vec();
        let region = SnapshotRegion::<i16>::from_bytes(0x1000, bytes, 8, 8);
        assert_eq!(region.element_as_pointer(0).unwrap(), 0x7FFF_0000_1000);
    }
}
