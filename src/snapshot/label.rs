use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of label widths supported by the engine.
///
/// The width is chosen once at scan configuration; everything below the
/// configuration layer is generic over [`ScanLabel`] instead of branching on
/// a runtime type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelWidth {
    I8,
    I16,
    I32,
    I64,
}

impl LabelWidth {
    #[inline]
    pub fn size(&self) -> usize {
        match self {
            LabelWidth::I8 => 1,
            LabelWidth::I16 => 2,
            LabelWidth::I32 => 4,
            LabelWidth::I64 => 8,
        }
    }
}

impl fmt::Display for LabelWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelWidth::I8 => write!(f, "i8"),
            LabelWidth::I16 => write!(f, "i16"),
            LabelWidth::I32 => write!(f, "i32"),
            LabelWidth::I64 => write!(f, "i64"),
        }
    }
}

/// Per-element accumulating score, independent of the element's raw value.
///
/// Overflow policy: repeated increments and decrements wrap at the width
/// boundary (two's complement). They do not saturate.
pub trait ScanLabel: Pod + Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    const WIDTH: LabelWidth;

    fn zero() -> Self;

    /// Wrapping `label + 1`.
    fn incr(self) -> Self;

    /// Wrapping `label - 1`.
    fn decr(self) -> Self;

    /// True for labels retained by the end-of-scan filter (`label > 0`).
    fn is_positive(self) -> bool;
}

macro_rules! impl_scan_label {
    ($ty:ty, $width:expr) => {
        impl ScanLabel for $ty {
            const WIDTH: LabelWidth = $width;

            #[inline]
            fn zero() -> Self {
                0
            }

            #[inline]
            fn incr(self) -> Self {
                self.wrapping_add(1)
            }

            #[inline]
            fn decr(self) -> Self {
                self.wrapping_sub(1)
            }

            #[inline]
            fn is_positive(self) -> bool {
                self > 0
            }
        }
    };
}

impl_scan_label!(i8, LabelWidth::I8);
impl_scan_label!(i16, LabelWidth::I16);
impl_scan_label!(i32, LabelWidth::I32);
impl_scan_label!(i64, LabelWidth::I64);
