//! Transaction hook
use core::fmt;

/// The operation a [`Transaction`] reports.
///
/// The discriminants are stable and match the codes used by the C interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Op {
    Close = 1,
    Clear = 2,
    Alloc = 3,
    Calloc = 4,
    Free = 5,
    Resize = 6,
}

impl Op {
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// A record passed to a pool's log function after each public operation.
///
/// Addresses are reported as integers; they are meant to be printed or
/// compared, not dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub op: Op,
    /// The byte size of the request. For [`Op::Calloc`] this is the
    /// per-element size.
    pub byte_size: usize,
    /// The element count of an [`Op::Calloc`]; zero otherwise.
    pub elt_count: usize,
    /// The address handed out, if any.
    pub new_addr: Option<usize>,
    /// The address given back, if any.
    pub old_addr: Option<usize>,
    /// The previous size of a [`Op::Resize`]; zero otherwise.
    pub old_byte_size: usize,
}

impl Transaction {
    #[inline]
    pub(crate) fn new(op: Op) -> Self {
        Self {
            op,
            byte_size: 0,
            elt_count: 0,
            new_addr: None,
            old_addr: None,
            old_byte_size: 0,
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn addr(a: Option<usize>) -> usize {
            a.unwrap_or(0)
        }
        match self.op {
            Op::Alloc => write!(
                f,
                "alloc {} bytes -> {:#x}",
                self.byte_size,
                addr(self.new_addr)
            ),
            Op::Calloc => write!(
                f,
                "calloc {} x {} bytes -> {:#x}",
                self.elt_count,
                self.byte_size,
                addr(self.new_addr)
            ),
            Op::Resize => write!(
                f,
                "resize {:#x} ({} bytes) to {} bytes -> {:#x}",
                addr(self.old_addr),
                self.old_byte_size,
                self.byte_size,
                addr(self.new_addr)
            ),
            Op::Free => write!(
                f,
                "free {:#x} ({} bytes)",
                addr(self.old_addr),
                self.byte_size
            ),
            Op::Clear => f.write_str("clear"),
            Op::Close => f.write_str("close"),
        }
    }
}

/// A function receiving every [`Transaction`] of a pool.
pub type LogFn = Box<dyn FnMut(&Transaction) + Send>;
