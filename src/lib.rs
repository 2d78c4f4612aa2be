//! This crate implements a page-oriented memory pool with segregated free
//! lists.
//!
//!  - **Pages come from the operating system in whole blocks.** A pool maps
//!    pages through `mmap` (of `/dev/zero` or anonymously), or through a
//!    custom [`PageSource`], and returns all of them at once when it is
//!    closed.
//!
//!  - **No per-allocation header.** The caller passes the size of an
//!    allocation back when freeing or resizing it. Allocations larger than a
//!    page start on a page boundary.
//!
//!  - **Overruns are caught.** A two-byte fence follows every allocation and
//!    is checked on free. Pool and block sentinels detect corruption of the
//!    pool's own records.
//!
//! A pool is not thread-safe; wrap it in a mutex to share it.
//!
//! # Examples
//!
//! ```rust
//! use rmpool::{Pool, PoolFlags};
//!
//! let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
//!
//! let ptr = pool.alloc(100).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(42, 100) };
//! assert_eq!(pool.stats().unwrap().user_alloced, 100);
//!
//! pool.free(ptr.as_ptr(), 100).unwrap();
//! pool.close().unwrap();
//! ```
//!
//! Writing past the end of an allocation is reported when it is freed:
//!
//! ```rust
//! use rmpool::{Error, Pool, PoolFlags};
//!
//! let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
//! let ptr = pool.alloc(10).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(0, 11) };
//! assert_eq!(pool.free(ptr.as_ptr(), 10), Err(Error::PntOver));
//! ```
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod class;
mod error;
mod fence;
mod flags;
mod handle;
mod pool;
mod source;
mod trace;
#[cfg(any(debug_assertions, feature = "tracking"))]
mod tracked;

pub use self::{
    class::{SizeClasses, MAX_BITS, NUM_CLASSES},
    error::{result_code, strerror, strerror_cstr, Error, NO_ERROR},
    fence::FENCE_SIZE,
    flags::PoolFlags,
    handle::{alloc, calloc, free, resize, SystemPool},
    pool::{Pool, PoolStats, MIN_ALLOCATION},
    source::{
        resolve_page_size, system_page_size, HeapSource, OsSource, PageSource,
        DEFAULT_PAGE_MULT,
    },
    trace::{LogFn, Op, Transaction},
};

#[cfg(unix)]
pub use self::source::MmapSource;

#[cfg(all(unix, feature = "sbrk"))]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "sbrk")))]
pub use self::source::SbrkSource;

#[cfg(any(debug_assertions, feature = "tracking"))]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "tracking")))]
pub use self::tracked::TrackedPool;
