//! Read and write cursors over a shared byte queue.
//!
//! Both cursor flavors carry `(queue, byte address, bit offset)`. Sub-byte
//! reads and writes pack MSB-first within a byte; varint encodings use the
//! conventional 7-bits-per-byte continuation. Read cursors additionally
//! carry a block end-address stack and a peek-position stack.

use casm_error::{CasmError, Result};
use casm_types::limits::{FIXED_BLOCK_SIZE_BYTES, RESUME_HEADROOM_BYTES};
use casm_types::IntValue;

use crate::queue::QueueHandle;

// ---------------------------------------------------------------------------
// ReadCursor
// ---------------------------------------------------------------------------

/// A pull-mode reading position into a shared byte queue.
#[derive(Debug)]
pub struct ReadCursor {
    queue: QueueHandle,
    byte_addr: usize,
    /// Bits already consumed from the byte at `byte_addr` (0..8, MSB-first).
    bit_offset: u8,
    /// Saved end-of-block addresses, innermost last.
    eob_stack: Vec<usize>,
    /// Saved positions for bounded lookahead.
    peek_stack: Vec<(usize, u8)>,
    /// Sticky flag: a read ran past the frozen end and returned 0.
    at_eof: bool,
}

impl Clone for ReadCursor {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            byte_addr: self.byte_addr,
            bit_offset: self.bit_offset,
            eob_stack: self.eob_stack.clone(),
            peek_stack: Vec::new(),
            at_eof: self.at_eof,
        }
    }
}

impl ReadCursor {
    /// Cursor at the start of `queue`.
    #[must_use]
    pub fn new(queue: QueueHandle) -> Self {
        Self {
            queue,
            byte_addr: 0,
            bit_offset: 0,
            eob_stack: Vec::new(),
            peek_stack: Vec::new(),
            at_eof: false,
        }
    }

    /// Current byte address.
    #[must_use]
    pub fn address(&self) -> usize {
        self.byte_addr
    }

    /// Whether any read has run past the frozen end.
    #[must_use]
    pub fn hit_eof(&self) -> bool {
        self.at_eof
    }

    /// Whether the backing queue is frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.queue.borrow().is_frozen()
    }

    fn available(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Innermost block end address, or the stream high-water mark.
    #[must_use]
    pub fn eob_limit(&self) -> usize {
        self.eob_stack
            .last()
            .copied()
            .unwrap_or_else(|| self.available())
    }

    /// Whether the cursor sits at (or past) the innermost block end.
    #[must_use]
    pub fn at_byte_eob(&self) -> bool {
        self.byte_addr >= self.eob_limit()
    }

    /// Bit-granular end-of-block test; a partially consumed final byte
    /// still counts as input.
    #[must_use]
    pub fn at_read_bit_eob(&self) -> bool {
        self.byte_addr >= self.eob_limit()
    }

    /// `frozen ∨ current + K ≤ available` for the resume margin `K`.
    #[must_use]
    pub fn has_enough_headroom(&self) -> bool {
        self.is_frozen() || self.byte_addr + RESUME_HEADROOM_BYTES <= self.available()
    }

    /// Pull one page from the queue's source. Returns `false` once frozen.
    pub fn fill_page(&mut self) -> Result<bool> {
        self.queue.borrow_mut().fill_page()
    }

    /// Open a block of `size` bytes starting at the cursor.
    pub fn push_eob_address(&mut self, size: u64) -> Result<()> {
        let limit = self.eob_limit() as u64;
        let end = self.byte_addr as u64 + size;
        if end > limit && (!self.eob_stack.is_empty() || self.is_frozen()) {
            return Err(CasmError::BlockSizeOverflow { size, limit });
        }
        self.eob_stack.push(end as usize);
        Ok(())
    }

    /// Close the innermost block.
    pub fn pop_eob_address(&mut self) {
        self.eob_stack.pop();
    }

    /// Save the current position for later restore.
    pub fn push_peek_pos(&mut self) {
        self.peek_stack.push((self.byte_addr, self.bit_offset));
    }

    /// Restore the most recently saved position.
    pub fn pop_peek_pos(&mut self) {
        if let Some((addr, bit)) = self.peek_stack.pop() {
            self.byte_addr = addr;
            self.bit_offset = bit;
        }
    }

    /// Skip any partially consumed byte.
    pub fn align_to_byte(&mut self) {
        if self.bit_offset != 0 {
            self.bit_offset = 0;
            self.byte_addr += 1;
        }
    }

    /// Read one bit, MSB-first within the current byte.
    pub fn read_bit(&mut self) -> u8 {
        let byte = match self.queue.borrow().byte_at(self.byte_addr) {
            Some(b) => b,
            None => {
                self.at_eof = true;
                0
            }
        };
        let bit = (byte >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_addr += 1;
        }
        bit
    }

    /// Read `bits` bits MSB-first into the low end of the result.
    pub fn read_bits(&mut self, bits: u32) -> IntValue {
        let mut value = 0;
        for _ in 0..bits {
            value = (value << 1) | IntValue::from(self.read_bit());
        }
        value
    }

    /// Read one octet. Past the frozen end this returns 0 and sets EOF.
    pub fn read_u8(&mut self) -> u8 {
        if self.bit_offset != 0 {
            return self.read_bits(8) as u8;
        }
        match self.queue.borrow().byte_at(self.byte_addr) {
            Some(b) => {
                self.byte_addr += 1;
                b
            }
            None => {
                self.at_eof = true;
                self.byte_addr += 1;
                0
            }
        }
    }

    /// Read a 4-byte little-endian unsigned integer.
    pub fn read_uint32(&mut self) -> u32 {
        let mut v = 0u32;
        for shift in [0u32, 8, 16, 24] {
            v |= u32::from(self.read_u8()) << shift;
        }
        v
    }

    /// Read an 8-byte little-endian unsigned integer.
    pub fn read_uint64(&mut self) -> u64 {
        let mut v = 0u64;
        for i in 0..8 {
            v |= u64::from(self.read_u8()) << (8 * i);
        }
        v
    }

    fn read_varuint(&mut self, max_bits: u32) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8();
            if shift >= max_bits {
                return Err(CasmError::VarintOverflow { max_bits });
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read an unsigned LEB128 of at most 32 significant bits.
    pub fn read_varuint32(&mut self) -> Result<u32> {
        Ok(self.read_varuint(32)? as u32)
    }

    /// Read an unsigned LEB128 of at most 64 significant bits.
    pub fn read_varuint64(&mut self) -> Result<u64> {
        self.read_varuint(64)
    }

    fn read_varint(&mut self, max_bits: u32) -> Result<i64> {
        let mut value = 0i64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8();
            if shift >= max_bits {
                return Err(CasmError::VarintOverflow { max_bits });
            }
            value |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return Ok(value);
            }
        }
    }

    /// Read a signed LEB128 of at most 32 significant bits.
    pub fn read_varint32(&mut self) -> Result<i32> {
        Ok(self.read_varint(35)? as i32)
    }

    /// Read a signed LEB128 of at most 64 significant bits.
    pub fn read_varint64(&mut self) -> Result<i64> {
        self.read_varint(70)
    }

    /// Read a block size prefix (fixed and minimized forms share the
    /// varuint32 decoding).
    pub fn read_block_size(&mut self) -> Result<u64> {
        Ok(u64::from(self.read_varuint32()?))
    }
}

// ---------------------------------------------------------------------------
// WriteCursor
// ---------------------------------------------------------------------------

/// A writing position into a shared byte queue.
///
/// Appends at the queue's high-water mark, or overwrites below it when the
/// cursor has been repositioned for a block-size backpatch.
#[derive(Debug)]
pub struct WriteCursor {
    queue: QueueHandle,
    byte_addr: usize,
    /// Bits already filled in the pending byte (0..8, MSB-first).
    bit_offset: u8,
    /// Accumulator for a partially written byte.
    partial: u8,
}

impl WriteCursor {
    /// Cursor at the append position of `queue`.
    #[must_use]
    pub fn new(queue: QueueHandle) -> Self {
        let addr = queue.borrow().len();
        Self {
            queue,
            byte_addr: addr,
            bit_offset: 0,
            partial: 0,
        }
    }

    /// A second cursor over the same queue positioned at `address`, for
    /// backpatching a reserved size slot.
    #[must_use]
    pub fn at_address(&self, address: usize) -> Self {
        Self {
            queue: self.queue.clone(),
            byte_addr: address,
            bit_offset: 0,
            partial: 0,
        }
    }

    /// Current byte address (exclusive of any pending partial byte).
    #[must_use]
    pub fn address(&self) -> usize {
        self.byte_addr
    }

    /// Reposition after a `move_block`.
    pub fn seek(&mut self, address: usize) {
        self.byte_addr = address;
        self.bit_offset = 0;
        self.partial = 0;
    }

    fn put(&mut self, byte: u8) -> Result<()> {
        let mut queue = self.queue.borrow_mut();
        if self.byte_addr < queue.len() {
            queue.set_byte(self.byte_addr, byte)?;
        } else {
            queue.push_byte(byte)?;
        }
        self.byte_addr += 1;
        Ok(())
    }

    /// Write one bit, MSB-first within the pending byte.
    pub fn write_bit(&mut self, bit: u8) -> Result<()> {
        if bit != 0 {
            self.partial |= 1 << (7 - self.bit_offset);
        }
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            let byte = self.partial;
            self.bit_offset = 0;
            self.partial = 0;
            self.put(byte)?;
        }
        Ok(())
    }

    /// Write the low `bits` bits of `value`, MSB-first.
    pub fn write_bits(&mut self, value: IntValue, bits: u32) -> Result<()> {
        for i in (0..bits).rev() {
            self.write_bit(((value >> i) & 1) as u8)?;
        }
        Ok(())
    }

    /// Write one octet.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        if self.bit_offset != 0 {
            return self.write_bits(IntValue::from(value), 8);
        }
        self.put(value)
    }

    /// Write a 4-byte little-endian unsigned integer.
    pub fn write_uint32(&mut self, value: u32) -> Result<()> {
        for shift in [0u32, 8, 16, 24] {
            self.write_u8((value >> shift) as u8)?;
        }
        Ok(())
    }

    /// Write an 8-byte little-endian unsigned integer.
    pub fn write_uint64(&mut self, value: u64) -> Result<()> {
        for i in 0..8 {
            self.write_u8((value >> (8 * i)) as u8)?;
        }
        Ok(())
    }

    /// Write an unsigned LEB128.
    pub fn write_varuint64(&mut self, value: u64) -> Result<()> {
        let mut v = value;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
            if v == 0 {
                return Ok(());
            }
        }
    }

    /// Write an unsigned LEB128 restricted to 32 bits.
    pub fn write_varuint32(&mut self, value: u32) -> Result<()> {
        self.write_varuint64(u64::from(value))
    }

    /// Write a signed LEB128.
    pub fn write_varint64(&mut self, value: i64) -> Result<()> {
        let mut v = value;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            let sign_clear = byte & 0x40 == 0;
            if (v == 0 && sign_clear) || (v == -1 && !sign_clear) {
                self.write_u8(byte)?;
                return Ok(());
            }
            self.write_u8(byte | 0x80)?;
        }
    }

    /// Write a signed LEB128 restricted to 32 bits.
    pub fn write_varint32(&mut self, value: i32) -> Result<()> {
        self.write_varint64(i64::from(value))
    }

    /// Write a fixed-mode block size: a varuint32 padded to its maximum
    /// width so the slot can be backpatched in place.
    pub fn write_fixed_block_size(&mut self, size: u64) -> Result<()> {
        let limit = u64::from(u32::MAX);
        if size > limit {
            return Err(CasmError::BlockSizeOverflow { size, limit });
        }
        for i in 0..FIXED_BLOCK_SIZE_BYTES {
            let mut byte = ((size >> (7 * i)) & 0x7f) as u8;
            if i + 1 < FIXED_BLOCK_SIZE_BYTES {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
        }
        Ok(())
    }

    /// Write a minimized block size as a plain varuint32.
    pub fn write_varuint_block_size(&mut self, size: u64) -> Result<()> {
        let limit = u64::from(u32::MAX);
        if size > limit {
            return Err(CasmError::BlockSizeOverflow { size, limit });
        }
        self.write_varuint32(size as u32)
    }

    /// Shift `count` payload bytes from `from` down to `to`, dropping the
    /// vacated tail and repositioning this cursor at the new end.
    pub fn move_block(&mut self, from: usize, to: usize, count: usize) -> Result<()> {
        self.queue.borrow_mut().move_down(from, to, count)?;
        self.seek(to + count);
        Ok(())
    }

    /// Zero-pad to the next byte boundary.
    pub fn align_to_byte(&mut self) -> Result<()> {
        if self.bit_offset != 0 {
            let byte = self.partial;
            self.bit_offset = 0;
            self.partial = 0;
            self.put(byte)?;
        }
        Ok(())
    }

    /// Align, then freeze the backing queue.
    pub fn freeze(&mut self) -> Result<()> {
        self.align_to_byte()?;
        self.queue.borrow_mut().freeze();
        Ok(())
    }
}
