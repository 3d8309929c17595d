//! Process memory access.
//!
//! The engine consumes a narrow accessor interface: byte reads at arbitrary
//! addresses, region enumeration with a static/heap classification, and the
//! process bitness used to select the pointer width. A Linux implementation
//! backed by `process_vm_readv` and `/proc/<pid>/maps` is provided.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(test)]
pub mod mock;

use anyhow::Result;

/// Address width of the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    Bits32,
    Bits64,
}

impl Bitness {
    /// Pointer width in bytes.
    #[inline]
    pub fn pointer_width(self) -> usize {
        match self {
            Bitness::Bits32 => 4,
            Bitness::Bits64 => 8,
        }
    }
}

/// Coarse classification of a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Module-backed (static) mapping.
    Static,
    /// Heap or anonymous writable mapping.
    Heap,
    /// Anything else (stacks, vdso, guard pages).
    Other,
}

/// One readable mapping of the target process.
#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub base: u64,
    pub size: usize,
    pub kind: RegionKind,
    /// Module name for static mappings.
    pub module: Option<String>,
}

impl RegionInfo {
    #[inline]
    pub fn end(&self) -> u64 {
        self.base + self.size as u64
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// Narrow read-only view of a target process.
///
/// `read` fills the whole buffer or fails; a failed read never leaves
/// partial data behind.
pub trait ProcessMemory: Send + Sync {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Enumerate readable regions with their classification.
    fn regions(&self) -> Result<Vec<RegionInfo>>;

    fn bitness(&self) -> Bitness;
}
