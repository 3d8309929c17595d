/// Per-element validity bitmap for a snapshot region.
///
/// Packed u64 words, one bit per element.
#[derive(Debug, Clone)]
pub struct ValidBitmap {
    words: Vec<u64>,
    len: usize,
}

impl ValidBitmap {
    pub fn new(len: usize, initial: bool) -> Self {
        let words = vec![if initial { u64::MAX } else { 0 }; len.div_ceil(64)];
        let mut bitmap = Self { words, len };
        if initial {
            bitmap.clear_tail();
        }
        bitmap
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        debug_assert!(index < self.len);
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    pub fn set_all(&mut self, value: bool) {
        let fill = if value { u64::MAX } else { 0 };
        self.words.fill(fill);
        if value {
            self.clear_tail();
        }
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    // Bits past `len` in the last word must stay clear so count_set is exact.
    fn clear_tail(&mut self) {
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let mut bitmap = ValidBitmap::new(100, false);
        assert_eq!(bitmap.count_set(), 0);

        bitmap.set(0, true);
        bitmap.set(63, true);
        bitmap.set(64, true);
        bitmap.set(99, true);

        assert!(bitmap.get(0));
        assert!(bitmap.get(63));
        assert!(bitmap.get(64));
        assert!(bitmap.get(99));
        assert!(!bitmap.get(1));
        assert_eq!(bitmap.count_set(), 4);

        bitmap.set(63, false);
        assert!(!bitmap.get(63));
        assert_eq!(bitmap.count_set(), 3);
    }

    #[test]
    fn set_all_respects_length() {
        let mut bitmap = ValidBitmap::new(70, true);
        assert_eq!(bitmap.count_set(), 70);

        bitmap.set_all(false);
        assert_eq!(bitmap.count_set(), 0);

        bitmap.set_all(true);
        assert_eq!(bitmap.count_set(), 70);
    }
}
