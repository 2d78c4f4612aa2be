use core::ptr::NonNull;
use std::{fs::File, os::unix::io::AsRawFd};

use super::PageSource;
use crate::Error;

/// Maps pages with `mmap`, either anonymously or from `/dev/zero`.
#[derive(Debug)]
pub struct MmapSource {
    /// `/dev/zero`, or `None` for anonymous mappings.
    zero: Option<File>,
    /// The offset into `/dev/zero` of the next mapping.
    offset: libc::off_t,
    /// Where the next mapping is asked to go.
    next_addr: Option<usize>,
}

impl MmapSource {
    /// Construct a source using anonymous mappings.
    pub fn anonymous(start_addr: Option<usize>) -> Self {
        Self {
            zero: None,
            offset: 0,
            next_addr: start_addr,
        }
    }

    /// Construct a source mapping `/dev/zero`.
    pub fn dev_zero(start_addr: Option<usize>) -> Result<Self, Error> {
        let zero = File::options()
            .read(true)
            .write(true)
            .open("/dev/zero")
            .map_err(|e| {
                log::warn!("could not open /dev/zero: {}", e);
                Error::OpenZero
            })?;
        Ok(Self {
            zero: Some(zero),
            offset: 0,
            next_addr: start_addr,
        })
    }
}

unsafe impl PageSource for MmapSource {
    unsafe fn acquire(&mut self, len: usize) -> Result<NonNull<u8>, Error> {
        let hint = self
            .next_addr
            .map_or(core::ptr::null_mut(), |addr| addr as *mut libc::c_void);
        let step = libc::off_t::try_from(len).map_err(|_| Error::Size)?;

        let (flags, fd, offset) = match &self.zero {
            Some(zero) => (libc::MAP_PRIVATE, zero.as_raw_fd(), self.offset),
            None => (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0),
        };

        let ptr = libc::mmap(
            hint,
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            fd,
            offset,
        );

        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            log::debug!("mmap({:p}, {}) failed: {}", hint, len, err);
            return Err(if err.raw_os_error() == Some(libc::ENOMEM) {
                Error::NoMem
            } else {
                Error::Mmap
            });
        }

        if self.zero.is_some() {
            self.offset = self.offset.wrapping_add(step);
        }
        if let Some(addr) = &mut self.next_addr {
            *addr = addr.wrapping_add(len);
        }

        NonNull::new(ptr.cast()).ok_or(Error::Mmap)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize) {
        if libc::munmap(ptr.as_ptr().cast(), len) != 0 {
            log::warn!(
                "munmap({:p}, {}) failed: {}",
                ptr,
                len,
                std::io::Error::last_os_error()
            );
        }
    }
}
