//! Mark Bits - Per-Block Mark Bitmap
//!
//! Mark bitmap untuk pair, float dan symbol block. Bitmap disimpan di
//! ujung block itu sendiri (lihat `allocator::arena`), 1 bit per cell.
//!
//! Bitmap Structure:
//! ```text
//! Block: 1024 bytes, cell 24 bytes
//! Capacity: 42 cells
//! Bitmap: ceil(42 / 64) = 1 word
//!
//! Cell index 37:
//! - Word index: 37 / 64 = 0
//! - Bit offset: 37 % 64 = 37
//! ```

/// MarkBits - view over a bitmap stored inside a cell block
///
/// Tidak memiliki memory sendiri; hanya pointer ke words di dalam block.
#[derive(Debug, Clone, Copy)]
pub struct MarkBits {
    words: *mut u64,
    len: usize,
}

impl MarkBits {
    /// Create view untuk `len` words mulai dari `words`
    ///
    /// # Safety
    /// `words` must point at `len` writable, 8-byte aligned words that
    /// outlive every use of the returned view.
    pub unsafe fn from_raw(words: *mut u64, len: usize) -> Self {
        Self { words, len }
    }

    fn indices(&self, index: usize) -> (usize, u64) {
        let word = index / 64;
        debug_assert!(word < self.len, "mark bit {} outside bitmap", index);
        (word, 1u64 << (index % 64))
    }

    /// Mark cell `index`
    pub fn set(&self, index: usize) {
        let (word, bit) = self.indices(index);
        unsafe { *self.words.add(word) |= bit };
    }

    /// Unmark cell `index`
    pub fn unset(&self, index: usize) {
        let (word, bit) = self.indices(index);
        unsafe { *self.words.add(word) &= !bit };
    }

    /// Check apakah cell `index` sudah marked
    pub fn get(&self, index: usize) -> bool {
        let (word, bit) = self.indices(index);
        unsafe { *self.words.add(word) & bit != 0 }
    }

    /// Clear semua bits
    pub fn clear_all(&self) {
        for i in 0..self.len {
            unsafe { *self.words.add(i) = 0 };
        }
    }

    /// Hitung jumlah cell yang marked
    pub fn count_marked(&self) -> usize {
        (0..self.len)
            .map(|i| unsafe { *self.words.add(i) }.count_ones() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_unset() {
        let mut storage = [0u64; 2];
        let bits = unsafe { MarkBits::from_raw(storage.as_mut_ptr(), 2) };

        bits.set(0);
        bits.set(63);
        bits.set(64);
        assert!(bits.get(0));
        assert!(bits.get(63));
        assert!(bits.get(64));
        assert!(!bits.get(1));
        assert_eq!(bits.count_marked(), 3);

        bits.unset(63);
        assert!(!bits.get(63));
        assert_eq!(bits.count_marked(), 2);

        bits.clear_all();
        assert_eq!(bits.count_marked(), 0);
        assert_eq!(storage, [0, 0]);
    }
}
