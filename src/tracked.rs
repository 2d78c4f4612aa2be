//! A pool that remembers the size of every live allocation
//!
//! [`Pool`] relies on the caller to pass back the size each allocation was
//! requested with. [`TrackedPool`] keeps a size map next to the pool and
//! rejects frees and resizes that don't match, which makes it useful for
//! shaking out callers in tests.
use core::ptr::NonNull;
use std::collections::BTreeMap;

use crate::{source::PageSource, Error, OsSource, Pool, PoolStats};

/// A [`Pool`] with a size map. See the [module-level documentation](self).
#[derive(Debug)]
pub struct TrackedPool<S: PageSource = OsSource> {
    pool: Pool<S>,
    sizes: BTreeMap<usize, usize>,
}

impl<S: PageSource> TrackedPool<S> {
    pub fn new(pool: Pool<S>) -> Self {
        Self {
            pool,
            sizes: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn pool(&self) -> &Pool<S> {
        &self.pool
    }

    /// The number of allocations the map knows about.
    #[inline]
    pub fn live(&self) -> usize {
        self.sizes.len()
    }

    /// The size `addr` was allocated with.
    #[inline]
    pub fn size_of(&self, addr: *const u8) -> Option<usize> {
        self.sizes.get(&(addr as usize)).copied()
    }

    pub fn alloc(&mut self, byte_size: usize) -> Result<NonNull<u8>, Error> {
        let ptr = self.pool.alloc(byte_size)?;
        self.sizes.insert(ptr.as_ptr() as usize, byte_size);
        Ok(ptr)
    }

    pub fn calloc(&mut self, ele_n: usize, ele_size: usize) -> Result<NonNull<u8>, Error> {
        let ptr = self.pool.calloc(ele_n, ele_size)?;
        self.sizes.insert(ptr.as_ptr() as usize, ele_n * ele_size);
        Ok(ptr)
    }

    /// Free `addr`, which must have been allocated with `size` bytes.
    ///
    /// Fails with [`Error::Size`] on a size mismatch and with
    /// [`Error::IsFree`] if the map doesn't know `addr`, without touching
    /// the pool.
    pub fn free(&mut self, addr: *mut u8, size: usize) -> Result<(), Error> {
        self.expect_size(addr, size)?;
        self.pool.free(addr, size)?;
        self.sizes.remove(&(addr as usize));
        Ok(())
    }

    pub fn resize(
        &mut self,
        old_addr: *mut u8,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, Error> {
        self.expect_size(old_addr, old_size)?;
        let ptr = self.pool.resize(old_addr, old_size, new_size)?;
        self.sizes.remove(&(old_addr as usize));
        self.sizes.insert(ptr.as_ptr() as usize, new_size);
        Ok(ptr)
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.pool.clear()?;
        self.sizes.clear();
        Ok(())
    }

    pub fn stats(&self) -> Result<PoolStats, Error> {
        self.pool.stats()
    }

    /// Unwrap the pool, forgetting the map.
    pub fn into_inner(self) -> Pool<S> {
        self.pool
    }

    fn expect_size(&self, addr: *mut u8, size: usize) -> Result<(), Error> {
        if addr.is_null() {
            return Err(Error::ArgNull);
        }
        match self.sizes.get(&(addr as usize)) {
            Some(&known) if known == size => Ok(()),
            Some(&known) => {
                log::warn!(
                    "{:p} was allocated with {} bytes, not {}",
                    addr,
                    known,
                    size
                );
                Err(Error::Size)
            }
            None => Err(Error::IsFree),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tests::TrackingSource, source::system_page_size, PoolFlags};

    fn tracked() -> TrackedPool<TrackingSource> {
        let _ = env_logger::builder().is_test(true).try_init();
        let page_size = system_page_size().unwrap();
        let pool =
            Pool::with_source(TrackingSource::new(page_size), PoolFlags::empty(), page_size)
                .unwrap();
        TrackedPool::new(pool)
    }

    #[test]
    fn mismatched_size_is_rejected() {
        let mut pool = tracked();
        let ptr = pool.alloc(100).unwrap();
        assert_eq!(pool.free(ptr.as_ptr(), 99), Err(Error::Size));
        assert_eq!(pool.stats().unwrap().num_alloced, 1);
        pool.free(ptr.as_ptr(), 100).unwrap();
        assert_eq!(pool.free(ptr.as_ptr(), 100), Err(Error::IsFree));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn resize_moves_the_entry() {
        let mut pool = tracked();
        let ptr = pool.calloc(4, 8).unwrap();
        assert_eq!(pool.size_of(ptr.as_ptr()), Some(32));
        let new = pool.resize(ptr.as_ptr(), 32, 64).unwrap();
        assert_eq!(pool.size_of(new.as_ptr()), Some(64));
        assert_eq!(pool.live(), 1);
        pool.clear().unwrap();
        assert_eq!(pool.live(), 0);
        pool.into_inner().close().unwrap();
    }
}
