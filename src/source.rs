//! Page sources
//!
//! A [`PageSource`] hands out runs of zero-initialised pages and takes them
//! back when the pool is closed. [`OsSource`] picks one of the built-in
//! strategies according to [`PoolFlags`].
use core::ptr::NonNull;
use std::sync::OnceLock;

use crate::{Error, PoolFlags};

mod heap;
pub use self::heap::HeapSource;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod mmap;
        pub use self::mmap::MmapSource;
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(unix, feature = "sbrk"))] {
        mod sbrk;
        pub use self::sbrk::SbrkSource;
    }
}

/// The default pool page size is this many system pages.
pub const DEFAULT_PAGE_MULT: usize = 16;

/// The source of pages for a [`Pool`].
///
/// [`Pool`]: crate::Pool
///
/// # Safety
///
/// A successful [`acquire`] must return a pointer to `len` bytes of
/// zero-initialised, readable and writable memory that stays valid and
/// unaliased until it is passed to [`release`] (or forever if
/// [`supports_release`] returns `false`).
///
/// [`acquire`]: Self::acquire
/// [`release`]: Self::release
/// [`supports_release`]: Self::supports_release
pub unsafe trait PageSource {
    /// Acquire `len` bytes. `len` is always a non-zero multiple of the pool's
    /// page size.
    ///
    /// # Safety
    ///
    /// `len` must be a non-zero multiple of the page size the source was
    /// configured for.
    unsafe fn acquire(&mut self, len: usize) -> Result<NonNull<u8>, Error>;

    /// Give back a range previously returned by [`Self::acquire`].
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must denote exactly one previous allocation that has
    /// not been released yet.
    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize);

    /// Get whether [`Self::release`] actually returns memory.
    #[inline]
    fn supports_release(&self) -> bool {
        true
    }
}

/// Get the page size of the system.
pub fn system_page_size() -> Result<usize, Error> {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    let page_size = *PAGE_SIZE.get_or_init(query_page_size);
    if page_size == 0 || !page_size.is_power_of_two() {
        Err(Error::PageSize)
    } else {
        Ok(page_size)
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        #[cold]
        fn query_page_size() -> usize {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if page_size <= 0 {
                0
            } else {
                page_size as usize
            }
        }
    } else {
        #[cold]
        fn query_page_size() -> usize {
            4096
        }
    }
}

/// Validate a requested pool page size or compute the default one if
/// `page_size` is zero.
pub fn resolve_page_size(page_size: usize) -> Result<usize, Error> {
    let system = system_page_size()?;

    if page_size > 0 {
        if page_size % system != 0 {
            return Err(Error::ArgInvalid);
        }
        Ok(page_size)
    } else {
        let page_size = system * DEFAULT_PAGE_MULT;
        if page_size % 1024 != 0 {
            return Err(Error::PageSize);
        }
        Ok(page_size)
    }
}

/// The page source chosen by [`PoolFlags`].
#[derive(Debug)]
pub enum OsSource {
    #[cfg(unix)]
    Mmap(MmapSource),
    #[cfg(all(unix, feature = "sbrk"))]
    Sbrk(SbrkSource),
    Heap(HeapSource),
}

impl OsSource {
    /// Construct the source selected by `flags`.
    ///
    /// `start_addr` is a hint for where the first mapping should be placed. It
    /// is ignored by the program-break and heap sources.
    pub fn for_flags(
        flags: PoolFlags,
        page_size: usize,
        start_addr: Option<usize>,
    ) -> Result<Self, Error> {
        if flags.contains(PoolFlags::USE_SBRK) {
            return Self::program_break(page_size);
        }
        Self::mapping(flags, page_size, start_addr)
    }

    #[cfg(all(unix, feature = "sbrk"))]
    fn program_break(page_size: usize) -> Result<Self, Error> {
        Ok(Self::Sbrk(SbrkSource::new(page_size)))
    }

    #[cfg(not(all(unix, feature = "sbrk")))]
    fn program_break(_page_size: usize) -> Result<Self, Error> {
        log::warn!("program-break source requested but the `sbrk` feature is disabled");
        Err(Error::ArgInvalid)
    }

    #[cfg(unix)]
    fn mapping(
        flags: PoolFlags,
        _page_size: usize,
        start_addr: Option<usize>,
    ) -> Result<Self, Error> {
        if flags.contains(PoolFlags::USE_MAP_ANON) {
            Ok(Self::Mmap(MmapSource::anonymous(start_addr)))
        } else {
            Ok(Self::Mmap(MmapSource::dev_zero(start_addr)?))
        }
    }

    #[cfg(not(unix))]
    fn mapping(
        _flags: PoolFlags,
        page_size: usize,
        _start_addr: Option<usize>,
    ) -> Result<Self, Error> {
        Ok(Self::Heap(HeapSource::new(page_size)))
    }
}

unsafe impl PageSource for OsSource {
    #[inline]
    unsafe fn acquire(&mut self, len: usize) -> Result<NonNull<u8>, Error> {
        match self {
            #[cfg(unix)]
            Self::Mmap(s) => s.acquire(len),
            #[cfg(all(unix, feature = "sbrk"))]
            Self::Sbrk(s) => s.acquire(len),
            Self::Heap(s) => s.acquire(len),
        }
    }

    #[inline]
    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize) {
        match self {
            #[cfg(unix)]
            Self::Mmap(s) => s.release(ptr, len),
            #[cfg(all(unix, feature = "sbrk"))]
            Self::Sbrk(s) => s.release(ptr, len),
            Self::Heap(s) => s.release(ptr, len),
        }
    }

    #[inline]
    fn supports_release(&self) -> bool {
        match self {
            #[cfg(unix)]
            Self::Mmap(s) => s.supports_release(),
            #[cfg(all(unix, feature = "sbrk"))]
            Self::Sbrk(s) => s.supports_release(),
            Self::Heap(s) => s.supports_release(),
        }
    }
}
