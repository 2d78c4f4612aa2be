use core::ptr::NonNull;
use std::alloc::{self, Layout};

use super::PageSource;
use crate::Error;

/// Takes pages from the global allocator.
///
/// Used where memory mapping is unavailable and for testing.
#[derive(Debug, Clone, Copy)]
pub struct HeapSource {
    align: usize,
}

impl HeapSource {
    /// Construct a source whose ranges are aligned to `align` bytes.
    /// `align` is rounded up to a power of two.
    pub fn new(align: usize) -> Self {
        Self {
            align: align.max(1).next_power_of_two(),
        }
    }

    fn layout(&self, len: usize) -> Result<Layout, Error> {
        Layout::from_size_align(len, self.align).map_err(|_| Error::Size)
    }
}

unsafe impl PageSource for HeapSource {
    unsafe fn acquire(&mut self, len: usize) -> Result<NonNull<u8>, Error> {
        let layout = self.layout(len)?;
        NonNull::new(alloc::alloc_zeroed(layout)).ok_or(Error::NoMem)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize) {
        if let Ok(layout) = self.layout(len) {
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}
