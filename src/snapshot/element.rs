use super::label::ScanLabel;
use super::region::SnapshotRegion;

/// Traversal mode for element iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterateMode {
    /// Walk comparable elements with access to current and previous values.
    ValuesAndLabels,
    /// Walk every element touching labels and validity only, skipping value
    /// access. Used by passes that never look at the captured bytes.
    LabelsOnly,
}

/// Transient, non-owning view over one element of a region.
///
/// Cursors are handed out by iteration and never stored.
pub struct Element<'a, L: ScanLabel> {
    region: &'a SnapshotRegion<L>,
    index: usize,
}

impl<'a, L: ScanLabel> Element<'a, L> {
    pub(super) fn new(region: &'a SnapshotRegion<L>, index: usize) -> Self {
        Self { region, index }
    }

    #[inline]
    pub fn address(&self) -> u64 {
        self.region.element_address(self.index)
    }

    #[inline]
    pub fn value(&self) -> &'a [u8] {
        self.region.element_bytes(self.index)
    }

    #[inline]
    pub fn previous_value(&self) -> Option<&'a [u8]> {
        self.region.element_previous_bytes(self.index)
    }

    /// Raw byte comparison at the declared element width.
    #[inline]
    pub fn changed(&self) -> bool {
        self.region.element_changed(self.index)
    }

    #[inline]
    pub fn label(&self) -> L {
        self.region.label(self.index)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.region.is_valid(self.index)
    }
}

/// Mutable counterpart of [`Element`], passed to per-element closures.
pub struct ElementMut<'a, L: ScanLabel> {
    region: &'a mut SnapshotRegion<L>,
    index: usize,
}

impl<'a, L: ScanLabel> ElementMut<'a, L> {
    pub(super) fn new(region: &'a mut SnapshotRegion<L>, index: usize) -> Self {
        Self { region, index }
    }

    #[inline]
    pub fn address(&self) -> u64 {
        self.region.element_address(self.index)
    }

    #[inline]
    pub fn changed(&self) -> bool {
        self.region.element_changed(self.index)
    }

    #[inline]
    pub fn label(&self) -> L {
        self.region.label(self.index)
    }

    #[inline]
    pub fn set_label(&mut self, label: L) {
        self.region.set_label(self.index, label);
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.region.is_valid(self.index)
    }

    #[inline]
    pub fn set_valid(&mut self, valid: bool) {
        self.region.set_valid(self.index, valid);
    }
}
