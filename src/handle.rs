//! Operations that accept an optional pool
//!
//! Passing `None` routes the call to the global allocator. The caller
//! supplies the size on free and resize just like it does for a pool.
use core::ptr::NonNull;
use std::alloc::{self, Layout};

use crate::{source::PageSource, Error, Pool};

/// The alignment of memory handed out by [`SystemPool`].
const SYSTEM_ALIGN: usize = 16;

/// The global allocator behind the same interface as [`Pool`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPool;

impl SystemPool {
    fn layout(size: usize) -> Result<Layout, Error> {
        if size == 0 {
            return Err(Error::ArgInvalid);
        }
        Layout::from_size_align(size, SYSTEM_ALIGN).map_err(|_| Error::Size)
    }

    pub fn alloc(self, size: usize) -> Result<NonNull<u8>, Error> {
        let layout = Self::layout(size)?;
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(Error::Alloc)
    }

    pub fn calloc(self, ele_n: usize, ele_size: usize) -> Result<NonNull<u8>, Error> {
        if ele_n == 0 || ele_size == 0 {
            return Err(Error::ArgInvalid);
        }
        let size = ele_n.checked_mul(ele_size).ok_or(Error::Size)?;
        let layout = Self::layout(size)?;
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or(Error::Alloc)
    }

    /// # Safety
    ///
    /// `addr` must have been returned by this allocator for `size` bytes and
    /// not freed since.
    pub unsafe fn free(self, addr: *mut u8, size: usize) -> Result<(), Error> {
        if addr.is_null() {
            return Err(Error::ArgNull);
        }
        alloc::dealloc(addr, Self::layout(size)?);
        Ok(())
    }

    /// # Safety
    ///
    /// See [`Self::free`].
    pub unsafe fn resize(
        self,
        old_addr: *mut u8,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, Error> {
        if old_addr.is_null() {
            return Err(Error::ArgNull);
        }
        let layout = Self::layout(old_size)?;
        // Validates `new_size`
        Self::layout(new_size)?;
        NonNull::new(alloc::realloc(old_addr, layout, new_size)).ok_or(Error::Alloc)
    }
}

/// Allocate from `pool`, or from the global allocator if `pool` is `None`.
pub fn alloc<S: PageSource>(pool: Option<&mut Pool<S>>, size: usize) -> Result<NonNull<u8>, Error> {
    match pool {
        Some(pool) => pool.alloc(size),
        None => SystemPool.alloc(size),
    }
}

/// [`Pool::calloc`] or its global-allocator counterpart.
pub fn calloc<S: PageSource>(
    pool: Option<&mut Pool<S>>,
    ele_n: usize,
    ele_size: usize,
) -> Result<NonNull<u8>, Error> {
    match pool {
        Some(pool) => pool.calloc(ele_n, ele_size),
        None => SystemPool.calloc(ele_n, ele_size),
    }
}

/// [`Pool::free`] or its global-allocator counterpart.
///
/// # Safety
///
/// If `pool` is `None`, `addr` must satisfy [`SystemPool::free`]'s
/// requirements.
pub unsafe fn free<S: PageSource>(
    pool: Option<&mut Pool<S>>,
    addr: *mut u8,
    size: usize,
) -> Result<(), Error> {
    match pool {
        Some(pool) => pool.free(addr, size),
        None => SystemPool.free(addr, size),
    }
}

/// [`Pool::resize`] or its global-allocator counterpart.
///
/// # Safety
///
/// If `pool` is `None`, `old_addr` must satisfy [`SystemPool::resize`]'s
/// requirements.
pub unsafe fn resize<S: PageSource>(
    pool: Option<&mut Pool<S>>,
    old_addr: *mut u8,
    old_size: usize,
    new_size: usize,
) -> Result<NonNull<u8>, Error> {
    match pool {
        Some(pool) => pool.resize(old_addr, old_size, new_size),
        None => SystemPool.resize(old_addr, old_size, new_size),
    }
}
