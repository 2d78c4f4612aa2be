//! Fence posts placed after user allocations
use core::ptr::NonNull;

use crate::Error;

/// The number of bytes in a fence.
pub const FENCE_SIZE: usize = 2;

const FENCE_MAGIC0: u8 = 0xfa;
const FENCE_MAGIC1: u8 = 0xd3;

/// Write a fence at `at`.
///
/// # Safety
///
/// `at..at + FENCE_SIZE` must be writable memory owned by the pool.
#[inline]
pub(crate) unsafe fn write(at: NonNull<u8>) {
    at.as_ptr().write(FENCE_MAGIC0);
    at.as_ptr().add(1).write(FENCE_MAGIC1);
}

/// Check the fence at `at`.
///
/// # Safety
///
/// `at..at + FENCE_SIZE` must be readable memory owned by the pool.
#[inline]
pub(crate) unsafe fn check(at: NonNull<u8>) -> Result<(), Error> {
    if at.as_ptr().read() == FENCE_MAGIC0 && at.as_ptr().add(1).read() == FENCE_MAGIC1 {
        Ok(())
    } else {
        Err(Error::PntOver)
    }
}
