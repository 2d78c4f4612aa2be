//! The memory pool
use core::{fmt, mem, ptr::NonNull};
use std::collections::BTreeMap;

use crate::{
    class::{SizeClasses, FREE_RECORD_SIZE},
    fence,
    source::{self, OsSource, PageSource},
    trace::{LogFn, Op, Transaction},
    Error, PoolFlags,
};

mod block;
mod free;

use self::{block::BlockTable, free::FreeLists};

/// The smallest number of bytes reserved for an allocation, not counting the
/// fence.
pub const MIN_ALLOCATION: usize = FREE_RECORD_SIZE;

const WORD: usize = mem::size_of::<usize>();

const POOL_MAGIC: u32 = 0xabacaba;

/// The sentinel record stored at the start of the header page.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HeaderRecord {
    magic: u32,
    flags: u32,
    page_size: usize,
    magic2: u32,
}

const HEADER_LEN: usize = mem::size_of::<HeaderRecord>();

/// A range of memory obtained from the page source in one piece.
#[derive(Debug, Clone, Copy)]
struct Span {
    base: NonNull<u8>,
    len: usize,
}

impl Span {
    #[inline]
    fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    fn end(&self) -> usize {
        self.addr() + self.len
    }

    #[inline]
    fn contains(&self, addr: usize) -> bool {
        addr >= self.addr() && addr < self.end()
    }

    /// Get a pointer to `addr`, which must be inside the span.
    #[inline]
    fn ptr_at(&self, addr: usize) -> NonNull<u8> {
        debug_assert!(self.contains(addr));
        // Safety: `addr - self.addr()` is within the span
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(addr - self.addr())) }
    }
}

/// Counters reported by [`Pool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// The pool's page size.
    pub page_size: usize,
    /// The number of live allocations.
    pub num_alloced: usize,
    /// The sum of the requested sizes of live allocations.
    pub user_alloced: usize,
    /// The largest value `user_alloced` has reached.
    pub max_alloced: usize,
    /// The number of bytes obtained from the page source, header included.
    pub tot_alloced: usize,
}

#[cfg_attr(doc, svgbobdoc::transform)]
/// A memory pool.
///
/// Pages are obtained from a [`PageSource`] in whole blocks and carved into
/// allocations. Free chunks are kept on per-size-class lists and reused;
/// pages go back to the source only when the pool is closed or dropped.
///
/// Every allocation is followed by a two-byte fence unless the pool was
/// opened with [`PoolFlags::NO_FREE`]. The fence is checked when the
/// allocation is freed or resized.
///
/// # Memory Layout
///
/// <center>
/// ```svgbob
///   header page                     block (1 page)               block (3 pages)
///  ,--------+----------------,     ,------+--+------+--+-----,  ,----------------------,
///  | record |  spare (heavy  |     | user |F | user |F | free|  |  user             |F |
///  |        |   packing only)|     |      |  |      |  |     |  |                   |  |
///  '--------+----------------'     '------+--+------+--+-----'  '----------------------'
///                                                                 page-aligned start
/// ```
/// </center>
///
/// `F` is the fence. Block descriptors and free lists are held by the pool
/// itself, not inside the pages.
pub struct Pool<S: PageSource = OsSource> {
    source: S,
    flags: PoolFlags,
    page_size: usize,
    header: Span,
    /// Every span other than the header, keyed by start address.
    spans: BTreeMap<usize, Span>,
    blocks: BlockTable,
    free: FreeLists,
    alloc_count: usize,
    user_alloc: usize,
    max_alloc: usize,
    /// Pages obtained from the source, header included.
    page_count: usize,
    /// The page cap. Zero means unlimited.
    max_pages: usize,
    /// The lowest and one past the highest address ever handed out.
    lower: usize,
    upper: usize,
    log_func: Option<LogFn>,
    closed: bool,
}

// Safety: The pool exclusively owns every span it points to.
unsafe impl<S: PageSource + Send> Send for Pool<S> {}

impl<S: PageSource> fmt::Debug for Pool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("header", &self.header.base)
            .field("flags", &self.flags)
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count)
            .field("alloc_count", &self.alloc_count)
            .field("user_alloc", &self.user_alloc)
            .finish_non_exhaustive()
    }
}

/// Round `x` up to a multiple of `align`.
#[inline]
fn round_up(x: usize, align: usize) -> Option<usize> {
    Some(x.checked_add(align - 1)? / align * align)
}

impl Pool<OsSource> {
    /// Open a pool backed by the source `flags` selects.
    ///
    /// `page_size` must be zero or a multiple of the system page size. Zero
    /// selects [`DEFAULT_PAGE_MULT`] system pages. `start_addr` is a hint
    /// for where the mappings should be placed.
    ///
    /// [`DEFAULT_PAGE_MULT`]: crate::DEFAULT_PAGE_MULT
    pub fn open(
        flags: PoolFlags,
        page_size: usize,
        start_addr: Option<usize>,
    ) -> Result<Self, Error> {
        let page_size = source::resolve_page_size(page_size)?;
        let source = OsSource::for_flags(flags, page_size, start_addr)?;
        Self::with_source(source, flags, page_size)
    }
}

impl<S: PageSource> Pool<S> {
    /// Open a pool on a caller-supplied page source.
    ///
    /// The source must return ranges aligned to `page_size` for oversized
    /// allocations to be page-aligned.
    pub fn with_source(mut source: S, flags: PoolFlags, page_size: usize) -> Result<Self, Error> {
        let page_size = source::resolve_page_size(page_size)?;
        let _ = SizeClasses::get();
        let min_reserved =
            round_up(MIN_ALLOCATION + flags.fence_size(), WORD).ok_or(Error::TooBig)?;

        let header_pages = HEADER_LEN.div_ceil(page_size);
        let header_len = header_pages * page_size;

        // Safety: `header_len` is a non-zero multiple of `page_size`
        let base = unsafe { source.acquire(header_len)? };
        let header = Span {
            base,
            len: header_len,
        };

        // Safety: `base` is page-aligned and at least `HEADER_LEN` bytes long
        unsafe {
            base.cast::<HeaderRecord>().as_ptr().write(HeaderRecord {
                magic: POOL_MAGIC,
                flags: flags.bits(),
                page_size,
                magic2: POOL_MAGIC,
            });
        }

        let mut pool = Self {
            source,
            flags,
            page_size,
            header,
            spans: BTreeMap::new(),
            blocks: BlockTable::new(),
            free: FreeLists::new(min_reserved),
            alloc_count: 0,
            user_alloc: 0,
            max_alloc: 0,
            page_count: header_pages,
            max_pages: 0,
            lower: header.addr(),
            upper: header.end(),
            log_func: None,
            closed: false,
        };

        if flags.contains(PoolFlags::HEAVY_PACKING) {
            let (start, len) = pool.header_spare();
            pool.free_pointer(start, len)?;
        }

        log::debug!(
            "opened pool at {:p}: {} byte pages, flags {:?}",
            base,
            page_size,
            flags
        );
        Ok(pool)
    }

    #[inline]
    pub fn flags(&self) -> PoolFlags {
        self.flags
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The number of pages obtained from the source, header included.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// The page cap, header included. Zero means unlimited.
    #[inline]
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Borrow the page source.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Validate the pool's sentinel record.
    pub fn check(&self) -> Result<(), Error> {
        // Safety: The header span is owned and initialised by us
        let record = unsafe { self.header.base.cast::<HeaderRecord>().as_ptr().read() };
        if record.magic != POOL_MAGIC {
            log::warn!("pool at {:p}: bad leading magic", self.header.base);
            Err(Error::Pnt)
        } else if record.magic2 != POOL_MAGIC
            || record.page_size != self.page_size
            || record.flags != self.flags.bits()
        {
            log::warn!("pool at {:p}: bad trailing magic", self.header.base);
            Err(Error::PoolOver)
        } else {
            Ok(())
        }
    }

    /// Allocate `byte_size` bytes.
    ///
    /// The returned memory is not initialised, except for memory fresh from
    /// the page source.
    pub fn alloc(&mut self, byte_size: usize) -> Result<NonNull<u8>, Error> {
        self.check()?;
        let result = if byte_size == 0 {
            Err(Error::ArgInvalid)
        } else {
            self.alloc_mem(byte_size)
        };

        self.log(Transaction {
            byte_size,
            new_addr: result.ok().map(|p| p.as_ptr() as usize),
            ..Transaction::new(Op::Alloc)
        });
        result
    }

    /// Allocate `ele_n * ele_size` bytes and zero them.
    pub fn calloc(&mut self, ele_n: usize, ele_size: usize) -> Result<NonNull<u8>, Error> {
        self.check()?;
        let result = if ele_n == 0 || ele_size == 0 {
            Err(Error::ArgInvalid)
        } else {
            ele_n
                .checked_mul(ele_size)
                .ok_or(Error::Size)
                .and_then(|byte_size| {
                    let ptr = self.alloc_mem(byte_size)?;
                    // Safety: `ptr` points to `byte_size` bytes owned by us
                    unsafe { ptr.as_ptr().write_bytes(0, byte_size) };
                    Ok(ptr)
                })
        };

        self.log(Transaction {
            byte_size: ele_size,
            elt_count: ele_n,
            new_addr: result.ok().map(|p| p.as_ptr() as usize),
            ..Transaction::new(Op::Calloc)
        });
        result
    }

    /// Return an allocation of `size` bytes at `addr` to the pool.
    ///
    /// `size` must be the size the allocation was requested with. The
    /// memory is never read or written through `addr`; it is located from
    /// the pool's own spans.
    pub fn free(&mut self, addr: *mut u8, size: usize) -> Result<(), Error> {
        self.check()?;
        let result = if addr.is_null() {
            Err(Error::ArgNull)
        } else if size == 0 {
            Err(Error::ArgInvalid)
        } else {
            self.free_mem(addr as usize, size)
        };

        self.log(Transaction {
            byte_size: size,
            old_addr: Some(addr as usize).filter(|&a| a != 0),
            ..Transaction::new(Op::Free)
        });
        result
    }

    /// Move an allocation of `old_size` bytes at `old_addr` into a new one of
    /// `new_size` bytes. The common prefix is copied.
    ///
    /// The old allocation is validated before anything is allocated and is
    /// left in place if the new allocation fails. A `new_size` of zero is
    /// rejected.
    pub fn resize(
        &mut self,
        old_addr: *mut u8,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, Error> {
        self.check()?;
        let result = if old_addr.is_null() {
            Err(Error::ArgNull)
        } else if old_size == 0 || new_size == 0 {
            Err(Error::ArgInvalid)
        } else {
            self.resize_mem(old_addr as usize, old_size, new_size)
        };

        if let Ok(new_ptr) = result {
            self.log(Transaction {
                byte_size: new_size,
                new_addr: Some(new_ptr.as_ptr() as usize),
                old_addr: Some(old_addr as usize),
                old_byte_size: old_size,
                ..Transaction::new(Op::Resize)
            });
        }
        result
    }

    /// Forget every allocation and make all blocks available again.
    ///
    /// No pages are returned to the source. Pointers previously handed out
    /// must not be used afterwards.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.check()?;
        self.free.clear();

        let mut result = Ok(());
        let mut regions = Vec::with_capacity(self.blocks.len());
        for entry in self.blocks.chain() {
            match entry {
                Ok((start, desc)) if desc.is_valid() => regions.push((start, desc.bounds - start)),
                Ok((start, _)) => {
                    log::warn!("clear: skipping corrupt block at {:#x}", start);
                    result = Err(Error::PoolOver);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        for (start, len) in regions {
            if let Err(e) = self.free_pointer(start, len) {
                result = Err(e);
            }
        }
        if self.flags.contains(PoolFlags::HEAVY_PACKING) {
            let (start, len) = self.header_spare();
            if let Err(e) = self.free_pointer(start, len) {
                result = Err(e);
            }
        }

        self.alloc_count = 0;
        self.user_alloc = 0;

        self.log(Transaction::new(Op::Clear));
        result
    }

    /// Close the pool and return every page to the source.
    ///
    /// Every block is invalidated and released even if some of them turn out
    /// to be corrupt; the first such problem is reported as
    /// [`Error::PoolOver`]. If the sentinel record itself is corrupt the
    /// error is returned right away and the pages are released when the pool
    /// is dropped.
    pub fn close(mut self) -> Result<(), Error> {
        self.check()?;
        self.log(Transaction::new(Op::Close));
        self.shutdown()
    }

    /// Get the pool's counters.
    pub fn stats(&self) -> Result<PoolStats, Error> {
        self.check()?;
        Ok(PoolStats {
            page_size: self.page_size,
            num_alloced: self.alloc_count,
            user_alloced: self.user_alloc,
            max_alloced: self.max_alloc,
            tot_alloced: self.page_count * self.page_size,
        })
    }

    /// Install or remove the function receiving every [`Transaction`].
    pub fn set_log_func(&mut self, log_func: Option<LogFn>) -> Result<(), Error> {
        self.check()?;
        self.log_func = log_func;
        Ok(())
    }

    /// Cap the number of pages the pool may obtain.
    ///
    /// Under [`PoolFlags::HEAVY_PACKING`] the header page counts against the
    /// cap. Otherwise it does not.
    pub fn set_max_pages(&mut self, max_pages: usize) -> Result<(), Error> {
        self.check()?;
        self.max_pages = if self.flags.contains(PoolFlags::HEAVY_PACKING) {
            max_pages
        } else {
            max_pages.saturating_add(1)
        };
        Ok(())
    }

    #[inline]
    fn log(&mut self, transaction: Transaction) {
        if let Some(log_func) = &mut self.log_func {
            log_func(&transaction);
        }
    }

    /// The part of the header page usable for allocations.
    #[inline]
    fn header_spare(&self) -> (usize, usize) {
        let start = self.header.addr() + HEADER_LEN;
        (start, self.header.end() - start)
    }

    #[inline]
    fn pages_in(&self, size: usize) -> usize {
        size.div_ceil(self.page_size)
    }

    /// The number of bytes reserved for a user allocation of `byte_size`
    /// bytes, fence included.
    #[inline]
    fn reserved_len(&self, byte_size: usize) -> Result<usize, Error> {
        byte_size
            .max(MIN_ALLOCATION)
            .checked_add(self.flags.fence_size())
            .and_then(|len| round_up(len, WORD))
            .ok_or(Error::TooBig)
    }

    /// Find the span holding `addr` and get a pointer to it.
    fn ptr_at(&self, addr: usize) -> Result<NonNull<u8>, Error> {
        if self.header.contains(addr) {
            return Ok(self.header.ptr_at(addr));
        }
        self.spans
            .range(..=addr)
            .next_back()
            .map(|(_, span)| span)
            .filter(|span| span.contains(addr))
            .map(|span| span.ptr_at(addr))
            .ok_or(Error::FreeAddr)
    }

    /// Check that `addr..addr + len` lies in a single block (or in the
    /// header's spare area under heavy packing).
    fn locate(&self, addr: usize, len: usize) -> Result<(), Error> {
        let end = addr.checked_add(len).ok_or(Error::Mem)?;
        if addr < self.lower || end > self.upper {
            return Err(Error::Mem);
        }

        if let Some((start, desc)) = self.blocks.containing(addr) {
            if !desc.is_valid() {
                log::warn!("block descriptor at {:#x} is corrupt", start);
                return Err(Error::PoolOver);
            }
            return if end <= desc.bounds {
                Ok(())
            } else {
                Err(Error::NotFound)
            };
        }

        if self.flags.contains(PoolFlags::HEAVY_PACKING) {
            let (spare, spare_len) = self.header_spare();
            if addr >= spare && end <= spare + spare_len {
                return Ok(());
            }
        }
        Err(Error::NotFound)
    }

    /// Obtain `page_n` pages from the source and add them as a new block.
    /// Returns the block's start.
    fn new_block(&mut self, page_n: usize) -> Result<usize, Error> {
        if self.max_pages > 0 && self.page_count.saturating_add(page_n) > self.max_pages {
            log::debug!(
                "new_block: {} + {} pages exceeds the cap of {}",
                self.page_count,
                page_n,
                self.max_pages
            );
            return Err(Error::NoPages);
        }

        let len = page_n.checked_mul(self.page_size).ok_or(Error::TooBig)?;
        // Safety: `len` is a non-zero multiple of `page_size`
        let base = unsafe { self.source.acquire(len)? };
        let span = Span { base, len };

        self.page_count += page_n;
        self.spans.insert(span.addr(), span);
        self.blocks.push_front(span.addr(), span.end());

        log::trace!("new_block: {:#x}..{:#x}", span.addr(), span.end());
        Ok(span.addr())
    }

    /// Return `addr..addr + size` to the free lists.
    ///
    /// A chunk larger than a page always starts a block and covers the whole
    /// of it, so its length is rounded up to whole pages.
    fn free_pointer(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        if size == 0 {
            return Ok(());
        }
        let len = if size > self.page_size {
            self.pages_in(size) * self.page_size
        } else {
            size
        };
        let bit = SizeClasses::get().size_to_free_bits(len);
        self.free.insert(bit, addr, len)
    }

    /// Split the multi-page block holding the free chunk at `start` so that
    /// its first part covers `size` bytes in whole pages. Everything not
    /// covered is freed.
    fn split_block(&mut self, start: usize, size: usize) -> Result<(), Error> {
        let page_n = self.pages_in(size);
        let new_start = self.blocks.split(start, page_n * self.page_size)?;

        if page_n == 1 {
            let end = start + size;
            self.free_pointer(end, new_start - end)?;
        }

        let new_bounds = self.blocks.get(new_start)?.bounds;
        self.free_pointer(new_start, new_bounds - new_start)
    }

    /// Find room for `byte_size` bytes. Returns the address.
    fn get_space(&mut self, byte_size: usize) -> Result<usize, Error> {
        let size = round_up(byte_size, WORD).ok_or(Error::TooBig)?;

        let chunk = if self.flags.contains(PoolFlags::BEST_FIT) {
            self.free.take_best_fit(size)
        } else if size > self.page_size {
            // Whole blocks are filed under the floor class of their length.
            self.free
                .take_floor_fit(size)
                .or_else(|| self.free.take_first_fit(size))
        } else {
            self.free.take_first_fit(size)
        };

        let (addr, left) = match chunk {
            Some(chunk) if self.pages_in(chunk.len) > self.pages_in(size) => {
                self.split_block(chunk.addr, size)?;
                (chunk.addr, 0)
            }
            Some(chunk) => (chunk.addr, chunk.len - size),
            None => {
                let page_n = self.pages_in(size);
                let addr = self.new_block(page_n)?;
                (addr, page_n * self.page_size - size)
            }
        };

        // The tail of a multi-page allocation stays with it.
        if left > 0 && size <= self.page_size {
            self.free_pointer(addr + size, left)?;
        }

        self.lower = self.lower.min(addr);
        self.upper = self.upper.max(addr + size);
        Ok(addr)
    }

    fn alloc_mem(&mut self, byte_size: usize) -> Result<NonNull<u8>, Error> {
        let reserved = self.reserved_len(byte_size)?;
        let addr = self.get_space(reserved)?;
        let ptr = self.ptr_at(addr)?;

        if self.flags.fence_size() > 0 {
            // Safety: `reserved` covers the user bytes and the fence
            unsafe { fence::write(NonNull::new_unchecked(ptr.as_ptr().add(byte_size))) };
        }

        self.alloc_count += 1;
        self.user_alloc += byte_size;
        self.max_alloc = self.max_alloc.max(self.user_alloc);

        log::trace!("alloc({}) = {:#x}", byte_size, addr);
        Ok(ptr)
    }

    /// Validate a live allocation of `size` bytes at `addr`. Returns its
    /// reserved length.
    fn validate_live(&self, addr: usize, size: usize) -> Result<usize, Error> {
        let reserved = self.reserved_len(size)?;
        if reserved > self.page_size {
            // Multi-page allocations start their block.
            self.blocks.get(addr)?;
        }

        let fence_size = self.flags.fence_size();
        self.locate(addr, size + fence_size)?;

        if fence_size > 0 {
            let at = self.ptr_at(addr + size)?;
            // Safety: `locate` confirmed the fence lies in pool memory
            if let Err(e) = unsafe { fence::check(at) } {
                log::warn!("fence after {:#x} ({} bytes) was overwritten", addr, size);
                return Err(e);
            }
        }
        Ok(reserved)
    }

    fn free_mem(&mut self, addr: usize, size: usize) -> Result<(), Error> {
        let reserved = self.validate_live(addr, size)?;
        self.free_pointer(addr, reserved)?;

        self.alloc_count = self.alloc_count.saturating_sub(1);
        self.user_alloc = self.user_alloc.saturating_sub(size);

        log::trace!("free({:#x}, {})", addr, size);
        Ok(())
    }

    fn resize_mem(
        &mut self,
        old_addr: usize,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, Error> {
        self.validate_live(old_addr, old_size)?;
        let old_ptr = self.ptr_at(old_addr)?;

        let new_ptr = self.alloc_mem(new_size)?;
        // Safety: Both allocations are owned by us and have at least this
        // many bytes. They don't overlap because the old one is still live.
        unsafe {
            core::ptr::copy_nonoverlapping(
                old_ptr.as_ptr(),
                new_ptr.as_ptr(),
                old_size.min(new_size),
            );
        }

        if let Err(e) = self.free_mem(old_addr, old_size) {
            let _ = self.free_mem(new_ptr.as_ptr() as usize, new_size);
            return Err(e);
        }
        Ok(new_ptr)
    }

    /// Invalidate all blocks and the sentinel record, and release every span.
    fn shutdown(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.blocks.invalidate_all();

        // Safety: The header span is owned by us
        unsafe {
            let record = self.header.base.cast::<HeaderRecord>().as_ptr();
            (*record).magic = 0;
            (*record).magic2 = 0;
        }

        if !self.source.supports_release() {
            log::debug!("close: the page source keeps its pages");
        }
        for (_, span) in mem::take(&mut self.spans) {
            // Safety: `span` was returned by `acquire` and not released since
            unsafe { self.source.release(span.base, span.len) };
        }
        // Safety: Ditto
        unsafe { self.source.release(self.header.base, self.header.len) };

        log::debug!("closed pool at {:p}", self.header.base);
        result
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut BlockTable {
        &mut self.blocks
    }

    #[cfg(test)]
    pub(crate) fn free_lists(&self) -> &FreeLists {
        &self.free
    }

    #[cfg(test)]
    pub(crate) fn header_addr(&self) -> usize {
        self.header.addr()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_header(&mut self, leading: bool) {
        // Safety: The header span is owned by us
        unsafe {
            let record = self.header.base.cast::<HeaderRecord>().as_ptr();
            if leading {
                (*record).magic = !POOL_MAGIC;
            } else {
                (*record).magic2 = !POOL_MAGIC;
            }
        }
    }
}

impl<S: PageSource> Drop for Pool<S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("dropping pool: {}", e);
        }
    }
}
