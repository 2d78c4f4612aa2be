//! Segregated free lists
use crate::{
    class::{ChunkRepr, SizeClasses, NUM_CLASSES},
    Error,
};

/// How many entries of a free list are examined by best-fit selection and by
/// the double-free check.
pub(crate) const MAX_FREE_LIST_SEARCH: usize = 100;

/// A free chunk. For classes below the record threshold `len` is the class
/// capacity, not the chunk's actual length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeChunk {
    pub(crate) addr: usize,
    pub(crate) len: usize,
}

/// One LIFO list per size class. The head of each list is the last element.
#[derive(Debug)]
pub(crate) struct FreeLists {
    lists: [Vec<FreeChunk>; NUM_CLASSES],
    /// Chunks shorter than this can't satisfy any request and are dropped.
    min_len: usize,
}

impl FreeLists {
    pub(crate) fn new(min_len: usize) -> Self {
        Self {
            lists: core::array::from_fn(|_| Vec::new()),
            min_len,
        }
    }

    pub(crate) fn clear(&mut self) {
        for list in self.lists.iter_mut() {
            list.clear();
        }
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn head(&self, bit: usize) -> Option<FreeChunk> {
        self.lists.get(bit)?.last().copied()
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn class_len(&self, bit: usize) -> usize {
        self.lists.get(bit).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn chunk_count(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    /// Put `addr..addr + len` at the head of the list for class `bit`.
    ///
    /// Fails with [`Error::IsFree`] if `addr` is found among the first
    /// [`MAX_FREE_LIST_SEARCH`] entries of that list. Chunks shorter than
    /// the smallest reservation are not remembered.
    pub(crate) fn insert(&mut self, bit: usize, addr: usize, len: usize) -> Result<(), Error> {
        if len < self.min_len {
            log::trace!("dropping {} byte chunk at {:#x}", len, addr);
            return Ok(());
        }

        let classes = SizeClasses::get();
        let list = &mut self.lists[bit];

        if list
            .iter()
            .rev()
            .take(MAX_FREE_LIST_SEARCH)
            .any(|chunk| chunk.addr == addr)
        {
            log::debug!("{:#x} is already on free list {}", addr, bit);
            return Err(Error::IsFree);
        }

        let chunk = match classes.repr(bit) {
            ChunkRepr::Marker => {
                // Only one marker per class can be remembered. The chunk is
                // dropped after the double-free check.
                if list.is_empty() {
                    list.push(FreeChunk {
                        addr,
                        len: classes.bits_to_size(bit),
                    });
                }
                return Ok(());
            }
            ChunkRepr::Link => FreeChunk {
                addr,
                len: classes.bits_to_size(bit),
            },
            ChunkRepr::Record => FreeChunk { addr, len },
        };
        list.push(chunk);
        Ok(())
    }

    /// Pop the head of the first non-empty list whose class can hold `size`
    /// bytes.
    pub(crate) fn take_first_fit(&mut self, size: usize) -> Option<FreeChunk> {
        let start = SizeClasses::get().size_to_bits(size);
        self.lists
            .iter_mut()
            .skip(start)
            .find_map(|list| list.pop())
    }

    /// Remove the newest record of at least `size` bytes from the class
    /// `size` itself is filed under, looking at no more than
    /// [`MAX_FREE_LIST_SEARCH`] entries.
    pub(crate) fn take_floor_fit(&mut self, size: usize) -> Option<FreeChunk> {
        let classes = SizeClasses::get();
        let bit = classes.size_to_free_bits(size);
        if classes.repr(bit) != ChunkRepr::Record {
            return None;
        }

        let list = &mut self.lists[bit];
        let (i, _) = list
            .iter()
            .enumerate()
            .rev()
            .take(MAX_FREE_LIST_SEARCH)
            .find(|(_, chunk)| chunk.len >= size)?;
        Some(list.remove(i))
    }

    /// Remove the smallest chunk of at least `size` bytes among a bounded
    /// number of candidates.
    ///
    /// The candidates are the records of the class just below the one `size`
    /// maps to, and the entries of the first non-empty list at or above it.
    /// Only the first [`MAX_FREE_LIST_SEARCH`] entries of each list are
    /// examined.
    pub(crate) fn take_best_fit(&mut self, size: usize) -> Option<FreeChunk> {
        let classes = SizeClasses::get();
        let start = classes.size_to_bits(size);
        let mut best: Option<(usize, usize, usize)> = None; // (len, bit, index)

        let mut consider = |lists: &[Vec<FreeChunk>; NUM_CLASSES], bit: usize| {
            let list = &lists[bit];
            for (i, chunk) in list.iter().enumerate().rev().take(MAX_FREE_LIST_SEARCH) {
                if chunk.len >= size && best.map_or(true, |(len, _, _)| chunk.len < len) {
                    best = Some((chunk.len, bit, i));
                }
            }
        };

        if let Some(below) = start.checked_sub(1) {
            if classes.repr(below) == ChunkRepr::Record {
                consider(&self.lists, below);
            }
        }
        if let Some(bit) = (start..NUM_CLASSES).find(|&bit| !self.lists[bit].is_empty()) {
            consider(&self.lists, bit);
        }

        let (_, bit, i) = best?;
        Some(self.lists[bit].remove(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lists() -> (FreeLists, &'static SizeClasses) {
        (FreeLists::new(0), SizeClasses::get())
    }

    #[test]
    fn lifo_order() {
        let (mut free, classes) = lists();
        let bit = classes.size_to_free_bits(64);
        free.insert(bit, 0x1000, 64).unwrap();
        free.insert(bit, 0x2000, 70).unwrap();
        assert_eq!(free.head(bit), Some(FreeChunk { addr: 0x2000, len: 70 }));
        assert_eq!(free.take_first_fit(60), Some(FreeChunk { addr: 0x2000, len: 70 }));
        assert_eq!(free.take_first_fit(60), Some(FreeChunk { addr: 0x1000, len: 64 }));
        assert_eq!(free.take_first_fit(60), None);
    }

    #[test]
    fn double_insert_is_rejected() {
        let (mut free, classes) = lists();
        for size in [1, classes.bits_to_size(classes.min_bit_free_next()), 100] {
            let bit = classes.size_to_free_bits(size);
            free.insert(bit, 0x1000, size).unwrap();
            assert_eq!(free.insert(bit, 0x1000, size), Err(Error::IsFree));
        }
    }

    #[test]
    fn markers_keep_only_the_head() {
        let (mut free, _) = lists();
        free.insert(0, 0x1000, 1).unwrap();
        free.insert(0, 0x1001, 1).unwrap();
        assert_eq!(free.class_len(0), 1);
        assert_eq!(free.head(0).map(|c| c.addr), Some(0x1000));
    }

    #[test]
    fn links_record_class_size() {
        let (mut free, classes) = lists();
        let bit = classes.min_bit_free_next();
        if classes.repr(bit) != ChunkRepr::Link {
            return;
        }
        let actual = classes.bits_to_size(bit) + 3;
        free.insert(bit, 0x1000, actual).unwrap();
        assert_eq!(free.head(bit).unwrap().len, classes.bits_to_size(bit));
    }

    #[test]
    fn first_fit_skips_small_classes() {
        let (mut free, classes) = lists();
        free.insert(classes.size_to_free_bits(40), 0x1000, 40).unwrap();
        free.insert(classes.size_to_free_bits(300), 0x2000, 300).unwrap();
        assert_eq!(free.take_first_fit(64).map(|c| c.addr), Some(0x2000));
        assert_eq!(free.chunk_count(), 1);
    }

    #[test]
    fn best_fit_looks_below_the_ceiling_class() {
        let (mut free, classes) = lists();
        // 120 and 100 share class 6 (64..128); a request for 90 maps to
        // class 7.
        free.insert(classes.size_to_free_bits(200), 0x3000, 200).unwrap();
        free.insert(classes.size_to_free_bits(120), 0x1000, 120).unwrap();
        free.insert(classes.size_to_free_bits(100), 0x2000, 100).unwrap();
        free.insert(classes.size_to_free_bits(70), 0x4000, 70).unwrap();

        assert_eq!(free.take_best_fit(90), Some(FreeChunk { addr: 0x2000, len: 100 }));
        assert_eq!(free.take_best_fit(90), Some(FreeChunk { addr: 0x1000, len: 120 }));
        assert_eq!(free.take_best_fit(90), Some(FreeChunk { addr: 0x3000, len: 200 }));
        assert_eq!(free.take_best_fit(90), None);
        assert_eq!(free.chunk_count(), 1);
    }

    #[test]
    fn best_fit_prefers_smallest_in_first_class() {
        let (mut free, classes) = lists();
        let bit = classes.size_to_free_bits(256);
        free.insert(bit, 0x1000, 500).unwrap();
        free.insert(bit, 0x2000, 260).unwrap();
        free.insert(bit, 0x3000, 400).unwrap();
        assert_eq!(free.take_best_fit(256).map(|c| c.addr), Some(0x2000));
    }

    #[test]
    fn short_chunks_are_dropped() {
        let classes = SizeClasses::get();
        let mut free = FreeLists::new(24);
        for (addr, len) in [(0x1000, 8), (0x2000, 16), (0x3000, 23)] {
            free.insert(classes.size_to_free_bits(len), addr, len).unwrap();
        }
        assert_eq!(free.chunk_count(), 0);

        free.insert(classes.size_to_free_bits(24), 0x4000, 24).unwrap();
        assert_eq!(
            free.insert(classes.size_to_free_bits(24), 0x4000, 24),
            Err(Error::IsFree)
        );
        assert_eq!(free.chunk_count(), 1);
    }

    #[test]
    fn floor_fit_finds_whole_blocks() {
        let (mut free, classes) = lists();
        let page = 4096;
        // Three- and two-page blocks are both filed under the two-page class.
        for (addr, len) in [(0x10000, page * 3), (0x20000, page * 2), (0x30000, page * 3)] {
            free.insert(classes.size_to_free_bits(len), addr, len).unwrap();
        }

        // A three-page request maps to the four-page class, which is empty.
        assert_eq!(free.take_first_fit(page * 3), None);
        assert_eq!(
            free.take_floor_fit(page * 3),
            Some(FreeChunk { addr: 0x30000, len: page * 3 })
        );
        assert_eq!(
            free.take_floor_fit(page * 3),
            Some(FreeChunk { addr: 0x10000, len: page * 3 })
        );
        assert_eq!(free.take_floor_fit(page * 3), None);
        assert_eq!(free.chunk_count(), 1);
    }
}
