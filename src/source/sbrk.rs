use core::ptr::NonNull;

use super::PageSource;
use crate::Error;

/// Grows the program break. Memory is never given back.
#[derive(Debug)]
pub struct SbrkSource {
    page_size: usize,
}

impl SbrkSource {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }
}

fn sbrk(len: usize) -> Result<*mut u8, Error> {
    let increment = libc::intptr_t::try_from(len).map_err(|_| Error::Size)?;
    let mem = unsafe { libc::sbrk(increment) };
    if mem as isize == -1 {
        log::debug!("sbrk({}) failed: {}", len, std::io::Error::last_os_error());
        return Err(Error::NoMem);
    }
    Ok(mem.cast())
}

unsafe impl PageSource for SbrkSource {
    unsafe fn acquire(&mut self, len: usize) -> Result<NonNull<u8>, Error> {
        let mut mem = sbrk(len)?;

        // Extend the break so that the returned range starts on a page
        // boundary.
        let misalign = mem as usize % self.page_size;
        if misalign > 0 {
            let fill = self.page_size - misalign;
            let fill_mem = sbrk(fill)?;
            if fill_mem as usize != mem as usize + len {
                return Err(Error::SbrkContig);
            }
            mem = mem.add(fill);
        }

        NonNull::new(mem).ok_or(Error::NoMem)
    }

    #[inline]
    unsafe fn release(&mut self, _ptr: NonNull<u8>, _len: usize) {}

    #[inline]
    fn supports_release(&self) -> bool {
        false
    }
}
