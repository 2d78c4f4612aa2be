//! Size-class table
//!
//! A size class ("bit") `n` stands for chunks of `1 << n` bytes. Requests are
//! mapped with a ceiling function and freed chunks with a floor function, so a
//! chunk is never filed under a class promising more than it holds.
use core::mem;
use std::sync::OnceLock;

/// The largest size class. Chunks are classified up to `1 << MAX_BITS` bytes
/// (1 GiB).
pub const MAX_BITS: usize = 30;

/// The number of free lists held by a pool.
pub const NUM_CLASSES: usize = MAX_BITS + 1;

/// The size of a `{next, size}` free record. Every reservation is at least
/// this large.
pub(crate) const FREE_RECORD_SIZE: usize = mem::size_of::<[usize; 2]>();

/// How a free chunk of a given class is remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkRepr {
    /// Too small to hold a link. Only the list head is kept; further chunks
    /// of the class are dropped.
    Marker,
    /// Holds a link but not a size. The size is inferred from the class.
    Link,
    /// Holds a link and its exact size.
    Record,
}

/// The process-wide size-class table.
#[derive(Debug)]
pub struct SizeClasses {
    sizes: [usize; NUM_CLASSES],
    min_bit_free_next: usize,
    min_bit_free_size: usize,
}

static CLASSES: OnceLock<SizeClasses> = OnceLock::new();

impl SizeClasses {
    /// Get the table, building it on first use.
    #[inline]
    pub fn get() -> &'static Self {
        CLASSES.get_or_init(Self::build)
    }

    #[cold]
    fn build() -> Self {
        let mut sizes = [0; NUM_CLASSES];
        let mut min_bit_free_next = None;
        let mut min_bit_free_size = None;

        for (bit, slot) in sizes.iter_mut().enumerate() {
            let size = 1usize << bit;
            *slot = size;

            if min_bit_free_next.is_none() && size >= mem::size_of::<usize>() {
                min_bit_free_next = Some(bit);
            }
            if min_bit_free_size.is_none() && size >= FREE_RECORD_SIZE {
                min_bit_free_size = Some(bit);
            }
        }

        let this = Self {
            sizes,
            min_bit_free_next: min_bit_free_next.unwrap_or(MAX_BITS),
            min_bit_free_size: min_bit_free_size.unwrap_or(MAX_BITS),
        };
        log::debug!(
            "size classes: link from bit {}, record from bit {}",
            this.min_bit_free_next,
            this.min_bit_free_size
        );
        this
    }

    /// The smallest class whose capacity is at least `size`.
    ///
    /// Returns [`NUM_CLASSES`] if `size` exceeds the largest class.
    #[inline]
    pub fn size_to_bits(&self, size: usize) -> usize {
        if size <= 1 {
            return 0;
        }
        let bit = (usize::BITS - (size - 1).leading_zeros()) as usize;
        bit.min(NUM_CLASSES)
    }

    /// The largest class whose capacity is at most `size`, clamped to
    /// [`MAX_BITS`]. Zero maps to class `0`.
    #[inline]
    pub fn size_to_free_bits(&self, size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        let bit = (usize::BITS - 1 - size.leading_zeros()) as usize;
        bit.min(MAX_BITS)
    }

    /// The capacity of a class, clamped at [`MAX_BITS`].
    #[inline]
    pub fn bits_to_size(&self, bit: usize) -> usize {
        self.sizes[bit.min(MAX_BITS)]
    }

    /// The smallest class able to hold a link.
    #[inline]
    pub fn min_bit_free_next(&self) -> usize {
        self.min_bit_free_next
    }

    /// The smallest class able to hold a `{next, size}` record.
    #[inline]
    pub fn min_bit_free_size(&self) -> usize {
        self.min_bit_free_size
    }

    #[inline]
    pub(crate) fn repr(&self, bit: usize) -> ChunkRepr {
        if bit < self.min_bit_free_next {
            ChunkRepr::Marker
        } else if bit < self.min_bit_free_size {
            ChunkRepr::Link
        } else {
            ChunkRepr::Record
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    /// Table scans with the same semantics as the bit arithmetic.
    fn scan_ceil(classes: &SizeClasses, size: usize) -> usize {
        (0..NUM_CLASSES)
            .find(|&bit| size <= classes.sizes[bit])
            .unwrap_or(NUM_CLASSES)
    }

    fn scan_floor(classes: &SizeClasses, size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        match (0..NUM_CLASSES).find(|&bit| size < classes.sizes[bit]) {
            Some(bit) => bit - 1,
            None => MAX_BITS,
        }
    }

    #[test]
    fn get_is_idempotent() {
        let a = SizeClasses::get() as *const SizeClasses;
        let b = SizeClasses::get() as *const SizeClasses;
        assert_eq!(a, b);
    }

    #[test]
    fn get_from_many_threads() {
        let addrs: Vec<usize> = (0..8)
            .map(|_| std::thread::spawn(|| SizeClasses::get() as *const _ as usize))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn thresholds() {
        let classes = SizeClasses::get();
        let word = mem::size_of::<usize>();
        assert_eq!(classes.bits_to_size(classes.min_bit_free_next()), word);
        assert_eq!(classes.bits_to_size(classes.min_bit_free_size()), 2 * word);
        assert_eq!(classes.repr(0), ChunkRepr::Marker);
        assert_eq!(classes.repr(classes.min_bit_free_next()), ChunkRepr::Link);
        assert_eq!(classes.repr(classes.min_bit_free_size()), ChunkRepr::Record);
        assert_eq!(classes.repr(MAX_BITS), ChunkRepr::Record);
    }

    #[test]
    fn edges() {
        let classes = SizeClasses::get();
        assert_eq!(classes.size_to_bits(0), 0);
        assert_eq!(classes.size_to_bits(1), 0);
        assert_eq!(classes.size_to_bits(2), 1);
        assert_eq!(classes.size_to_bits(3), 2);
        assert_eq!(classes.size_to_bits(1 << MAX_BITS), MAX_BITS);
        assert_eq!(classes.size_to_bits((1 << MAX_BITS) + 1), NUM_CLASSES);
        assert_eq!(classes.size_to_bits(usize::MAX), NUM_CLASSES);

        assert_eq!(classes.size_to_free_bits(0), 0);
        assert_eq!(classes.size_to_free_bits(10), 3);
        assert_eq!(classes.size_to_free_bits(16), 4);
        assert_eq!(classes.size_to_free_bits(usize::MAX), MAX_BITS);

        assert_eq!(classes.bits_to_size(MAX_BITS + 5), 1 << MAX_BITS);
    }

    #[quickcheck]
    fn matches_table_scan(size: usize) -> bool {
        let classes = SizeClasses::get();
        classes.size_to_bits(size) == scan_ceil(classes, size)
            && classes.size_to_free_bits(size) == scan_floor(classes, size)
    }

    #[quickcheck]
    fn floor_and_ceiling_bracket_size(size: u32) -> bool {
        let classes = SizeClasses::get();
        let size = (size as usize % (1 << MAX_BITS)) + 1;
        classes.bits_to_size(classes.size_to_bits(size)) >= size
            && classes.bits_to_size(classes.size_to_free_bits(size)) <= size
    }
}
