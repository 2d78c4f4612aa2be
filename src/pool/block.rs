//! Block descriptors
//!
//! A block is a run of whole pages acquired from the page source. Its
//! descriptor lives here, keyed by the block's start address, instead of in
//! the first bytes of the block.
use std::collections::BTreeMap;

use crate::Error;

pub(crate) const BLOCK_MAGIC: u32 = 0xb1b1007;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockDesc {
    magic: u32,
    /// One past the last byte of the block.
    pub(crate) bounds: usize,
    /// The next block in the pool's chain.
    pub(crate) next: Option<usize>,
    magic2: u32,
}

impl BlockDesc {
    fn new(bounds: usize, next: Option<usize>) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            bounds,
            next,
            magic2: BLOCK_MAGIC,
        }
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.magic == BLOCK_MAGIC && self.magic2 == BLOCK_MAGIC
    }

    fn invalidate(&mut self) {
        self.magic = 0;
        self.magic2 = 0;
    }
}

/// All blocks of a pool, chained from the most recently added one.
#[derive(Debug, Default)]
pub(crate) struct BlockTable {
    descs: BTreeMap<usize, BlockDesc>,
    first: Option<usize>,
}

impl BlockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.descs.len()
    }

    /// Add the block `start..bounds` to the front of the chain.
    pub(crate) fn push_front(&mut self, start: usize, bounds: usize) {
        debug_assert!(start < bounds);
        self.descs.insert(start, BlockDesc::new(bounds, self.first));
        self.first = Some(start);
    }

    /// Get the valid descriptor of the block starting at `start`.
    pub(crate) fn get(&self, start: usize) -> Result<&BlockDesc, Error> {
        match self.descs.get(&start) {
            Some(desc) if desc.is_valid() => Ok(desc),
            Some(_) => {
                log::warn!("block descriptor at {:#x} is corrupt", start);
                Err(Error::PoolOver)
            }
            None => Err(Error::PoolOver),
        }
    }

    /// Find the block covering `addr`.
    pub(crate) fn containing(&self, addr: usize) -> Option<(usize, &BlockDesc)> {
        self.descs
            .range(..=addr)
            .next_back()
            .filter(|(_, desc)| addr < desc.bounds)
            .map(|(&start, desc)| (start, desc))
    }

    /// Split the block at `start` after its first `keep_len` bytes. The new
    /// block takes the remainder and follows the original in the chain.
    /// Returns the new block's start.
    pub(crate) fn split(&mut self, start: usize, keep_len: usize) -> Result<usize, Error> {
        let desc = self
            .descs
            .get_mut(&start)
            .filter(|desc| desc.is_valid())
            .ok_or(Error::PoolOver)?;

        let new_start = start.checked_add(keep_len).ok_or(Error::BlockStat)?;
        if keep_len == 0 || new_start >= desc.bounds {
            return Err(Error::BlockStat);
        }

        let new_desc = BlockDesc::new(desc.bounds, desc.next);
        desc.bounds = new_start;
        desc.next = Some(new_start);
        self.descs.insert(new_start, new_desc);

        log::trace!(
            "split block {:#x}..{:#x} at {:#x}",
            start,
            new_desc.bounds,
            new_start
        );
        Ok(new_start)
    }

    /// Walk the chain from the most recently added block.
    pub(crate) fn chain(&self) -> Chain<'_> {
        Chain {
            table: self,
            next: self.first,
            remaining: self.descs.len(),
        }
    }

    /// Invalidate every descriptor. Returns [`Error::PoolOver`] if any of
    /// them was already corrupt.
    pub(crate) fn invalidate_all(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        for (start, desc) in self.descs.iter_mut() {
            if !desc.is_valid() {
                log::warn!("block descriptor at {:#x} is corrupt", start);
                result = Err(Error::PoolOver);
            }
            desc.invalidate();
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&mut self, start: usize) {
        if let Some(desc) = self.descs.get_mut(&start) {
            desc.magic2 = !BLOCK_MAGIC;
        }
    }
}

/// The iterator returned by [`BlockTable::chain`].
///
/// Yields `Err(PoolOver)` once and stops if the chain refers to a missing
/// descriptor or is longer than the table.
pub(crate) struct Chain<'a> {
    table: &'a BlockTable,
    next: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Chain<'a> {
    type Item = Result<(usize, &'a BlockDesc), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next.take()?;
        if self.remaining == 0 {
            return Some(Err(Error::PoolOver));
        }
        self.remaining -= 1;
        match self.table.descs.get(&start) {
            Some(desc) => {
                self.next = desc.next;
                Some(Ok((start, desc)))
            }
            None => Some(Err(Error::PoolOver)),
        }
    }
}
