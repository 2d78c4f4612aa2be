//! Error codes
use core::ffi::CStr;

use thiserror::Error;

/// The numeric code reported for a successful operation.
pub const NO_ERROR: i32 = 1;

/// Defines [`Error`] from one table of variants, codes and messages.
macro_rules! errors {
    ($(
        $(#[$meta:meta])*
        $name:ident = $code:literal => $msg:tt,
    )*) => {
        /// An error returned by a pool operation.
        ///
        /// Every variant has a stable numeric code ([`Error::code`]) so that
        /// the values can cross an FFI boundary unchanged. Code `1`
        /// ([`NO_ERROR`]) is reserved for success and has no variant.
        #[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum Error {
            $(
                $(#[$meta])*
                #[error($msg)]
                $name,
            )*
        }

        const ALL: &[Error] = &[$(Error::$name),*];

        impl Error {
            /// Get the numeric code of this error.
            pub const fn code(self) -> i32 {
                match self {
                    $(Self::$name => $code,)*
                }
            }

            /// The static message of this error. Same text as its `Display`
            /// output.
            pub const fn message(self) -> &'static str {
                match self {
                    $(Self::$name => $msg,)*
                }
            }

            /// [`Self::message`] with a trailing NUL.
            pub fn message_cstr(self) -> &'static CStr {
                let bytes: &'static [u8] = match self {
                    $(Self::$name => concat!($msg, "\0").as_bytes(),)*
                };
                CStr::from_bytes_with_nul(bytes).unwrap_or_default()
            }
        }
    };
}

errors! {
    ArgNull = 2 => "function argument is null",
    ArgInvalid = 3 => "function argument is invalid",
    /// The pool's leading sentinel does not match.
    Pnt = 4 => "invalid mpool pointer",
    /// The pool's trailing sentinel or a block descriptor does not match.
    PoolOver = 5 => "mpool structure was overwritten",
    PageSize = 6 => "could not get system page-size",
    OpenZero = 7 => "could not open /dev/zero",
    NoMem = 8 => "no memory available",
    Mmap = 9 => "problems with mmap",
    Size = 10 => "error processing requested size",
    TooBig = 11 => "allocation exceeds pool max size",
    /// The address lies outside of the pool's observed bounds.
    Mem = 12 => "invalid memory address",
    MemOver = 13 => "memory lower bounds overwritten",
    /// The address is not covered by any block of the pool.
    NotFound = 14 => "memory block not found in pool",
    IsFree = 15 => "memory address has already been freed",
    BlockStat = 16 => "invalid internal block status",
    FreeAddr = 17 => "invalid internal free address",
    SbrkContig = 18 => "sbrk did not return contiguous memory",
    NoPages = 19 => "no available pages left in pool",
    /// The ambient allocator failed (null-handle pass-through).
    Alloc = 20 => "system alloc function failed",
    /// The fence after a user allocation was overwritten.
    PntOver = 21 => "user pointer admin space overwritten",
}

impl Error {
    /// Recover an error from its numeric code. Returns `None` for
    /// [`NO_ERROR`] and for unknown codes.
    pub fn from_code(code: i32) -> Option<Self> {
        ALL.iter().copied().find(|e| e.code() == code)
    }
}

const NO_ERROR_MESSAGE: &str = "no error\0";
const UNKNOWN_MESSAGE: &str = "invalid error code\0";

/// Convert a `Result` into the numeric code the C interface reports.
pub fn result_code<T>(result: &Result<T, Error>) -> i32 {
    match result {
        Ok(_) => NO_ERROR,
        Err(e) => e.code(),
    }
}

/// Return the message for a numeric error code.
///
/// Always returns a valid string; unknown codes map to
/// `"invalid error code"`.
pub fn strerror(code: i32) -> &'static str {
    let msg = strerror_cstr(code).to_bytes();
    core::str::from_utf8(msg).unwrap_or_default()
}

/// [`strerror`] with a trailing NUL, for C callers.
pub fn strerror_cstr(code: i32) -> &'static CStr {
    let fallback = |msg: &'static str| CStr::from_bytes_with_nul(msg.as_bytes()).unwrap_or_default();
    if code == NO_ERROR {
        return fallback(NO_ERROR_MESSAGE);
    }
    match Error::from_code(code) {
        Some(e) => e.message_cstr(),
        None => fallback(UNKNOWN_MESSAGE),
    }
}
