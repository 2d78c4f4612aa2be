use bitflags::bitflags;

bitflags! {
    /// Attributes of a memory pool, given to [`Pool::open`].
    ///
    /// [`Pool::open`]: crate::Pool::open
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PoolFlags: u32 {
        /// Choose the smallest fitting free chunk among a bounded number of
        /// candidates instead of the first one found.
        const BEST_FIT = 1 << 0;

        /// Few if any frees are going to be performed on the pool. No fence
        /// is written after allocations and none is checked on free.
        const NO_FREE = 1 << 1;

        /// Make the rest of the page holding the pool header available for
        /// user allocations.
        const HEAVY_PACKING = 1 << 2;

        /// Grow the program break instead of mapping pages. Requires the
        /// `sbrk` feature. Not recommended for normal use.
        const USE_SBRK = 1 << 3;

        /// Use anonymous mappings instead of mapping `/dev/zero`.
        const USE_MAP_ANON = 1 << 4;
    }
}

impl PoolFlags {
    /// The number of fence bytes written after each allocation.
    #[inline]
    pub(crate) fn fence_size(self) -> usize {
        if self.contains(Self::NO_FREE) {
            0
        } else {
            crate::fence::FENCE_SIZE
        }
    }
}
