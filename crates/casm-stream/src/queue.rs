//! The page-allocated byte buffer backing every byte stream.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use casm_error::{CasmError, Result};
use casm_types::limits::PAGE_SIZE;
use tracing::{debug, trace};

/// Shared handle to a [`ByteQueue`].
///
/// A queue may have many read cursors but exactly one write cursor; the
/// single-threaded run loop makes `Rc<RefCell<_>>` sufficient.
pub type QueueHandle = Rc<RefCell<ByteQueue>>;

/// A growable page-allocated byte buffer with back-filled pull.
///
/// Bytes live in fixed-size pages so that growth never moves existing data.
/// The queue has a high-water mark (`len`), a monotonic frozen-at-eof flag,
/// and optionally a pull source from which `fill_page` appends more input.
pub struct ByteQueue {
    pages: Vec<Box<[u8; PAGE_SIZE]>>,
    len: usize,
    frozen: bool,
    source: Option<Box<dyn Read>>,
}

impl std::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteQueue")
            .field("len", &self.len)
            .field("frozen", &self.frozen)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteQueue {
    /// Create an empty, unfrozen queue with no pull source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            len: 0,
            frozen: false,
            source: None,
        }
    }

    /// Create a queue holding `bytes`, already frozen.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut queue = Self::new();
        for &b in bytes {
            queue.push_raw(b);
        }
        queue.frozen = true;
        queue
    }

    /// Create an empty queue that pulls from `source` one page at a time.
    #[must_use]
    pub fn with_source(source: Box<dyn Read>) -> Self {
        Self {
            pages: Vec::new(),
            len: 0,
            frozen: false,
            source: Some(source),
        }
    }

    /// Wrap a queue in a shared handle.
    #[must_use]
    pub fn into_handle(self) -> QueueHandle {
        Rc::new(RefCell::new(self))
    }

    /// Current high-water mark in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes have been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the freeze-eof transition has happened.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mark the stream complete. One-way; idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
        self.source = None;
    }

    /// Byte at `address`, or `None` past the high-water mark.
    #[must_use]
    pub fn byte_at(&self, address: usize) -> Option<u8> {
        if address >= self.len {
            return None;
        }
        Some(self.pages[address / PAGE_SIZE][address % PAGE_SIZE])
    }

    /// Append one byte at the high-water mark.
    pub fn push_byte(&mut self, byte: u8) -> Result<()> {
        if self.frozen {
            return Err(CasmError::WriteToFrozen);
        }
        self.push_raw(byte);
        Ok(())
    }

    fn push_raw(&mut self, byte: u8) {
        let page = self.len / PAGE_SIZE;
        if page == self.pages.len() {
            self.pages.push(Box::new([0u8; PAGE_SIZE]));
        }
        self.pages[page][self.len % PAGE_SIZE] = byte;
        self.len += 1;
    }

    /// Overwrite a byte below the high-water mark (block size backpatch).
    pub fn set_byte(&mut self, address: usize, byte: u8) -> Result<()> {
        if address >= self.len {
            return Err(CasmError::internal(format!(
                "backpatch at {address} past high-water mark {len}",
                len = self.len
            )));
        }
        self.pages[address / PAGE_SIZE][address % PAGE_SIZE] = byte;
        Ok(())
    }

    /// Shift `count` bytes from `from` down to `to` (`to < from`) and drop
    /// the vacated tail, shrinking the high-water mark by `from - to`.
    ///
    /// Used to close the gap left by a minimized block size prefix.
    pub fn move_down(&mut self, from: usize, to: usize, count: usize) -> Result<()> {
        if to >= from || from + count > self.len {
            return Err(CasmError::internal(format!(
                "bad move_down: from {from} to {to} count {count} len {len}",
                len = self.len
            )));
        }
        for i in 0..count {
            let b = self.byte_at(from + i).unwrap_or(0);
            self.set_byte(to + i, b)?;
        }
        self.len = to + count;
        Ok(())
    }

    /// Drop everything past `new_len` (failure cleanup).
    pub fn truncate(&mut self, new_len: usize) {
        if new_len < self.len {
            self.len = new_len;
        }
    }

    /// Pull up to one page from the source, freezing at source EOF.
    ///
    /// Returns `true` if any bytes arrived. A queue without a source
    /// freezes immediately.
    pub fn fill_page(&mut self) -> Result<bool> {
        if self.frozen {
            return Ok(false);
        }
        let Some(source) = self.source.as_mut() else {
            self.freeze();
            return Ok(false);
        };
        let mut buf = [0u8; PAGE_SIZE];
        let n = source.read(&mut buf)?;
        if n == 0 {
            debug!("source exhausted, freezing at {} bytes", self.len);
            self.freeze();
            return Ok(false);
        }
        trace!("pulled {} bytes at address {}", n, self.len);
        for &b in &buf[..n] {
            self.push_raw(b);
        }
        Ok(true)
    }

    /// Copy the queue contents out as a contiguous vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for address in 0..self.len {
            out.push(self.byte_at(address).unwrap_or(0));
        }
        out
    }
}
