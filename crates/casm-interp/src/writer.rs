//! Write-side backends of the interpreter.
//!
//! The interpreter's traversal is the same whether it emits raw module
//! bytes or logical integer events; the difference is behind
//! [`InterpWriter`]. The byte backend owns block size prefixes and their
//! backpatching; the integer backend turns the same operations into stream
//! brackets.

use casm_error::{CasmError, Result};
use casm_stream::{IntStreamWriter, WriteCursor};
use casm_types::{IntFormat, IntValue, StreamType};

use casm_ast::PredefinedSymbol;

/// Token returned by [`InterpWriter::begin_block`], fed back to
/// [`InterpWriter::end_block`].
#[derive(Debug, Clone, Copy)]
pub struct BlockMark {
    /// Address of the reserved size slot (byte backend).
    slot: usize,
    /// Address just past the reserved slot, where the payload starts.
    payload_start: usize,
}

/// The write half the interpreter evaluates against.
pub trait InterpWriter {
    /// Granularity of the backing stream.
    fn stream_type(&self) -> StreamType;

    /// Write a value in the given wire format.
    fn write_value(&mut self, value: IntValue, format: IntFormat) -> Result<()>;

    /// Write the low `bits` bits of `value`.
    fn write_bits(&mut self, value: IntValue, bits: u32) -> Result<()>;

    /// Write a header pair.
    fn write_header_value(&mut self, value: IntValue, format: IntFormat) -> Result<()>;

    /// Apply a named action. Returns `false` if the action is not handled
    /// by this backend.
    fn write_action(&mut self, action: PredefinedSymbol) -> Result<bool>;

    /// Open a size-delimited block (or bracket, for logical streams).
    fn begin_block(&mut self) -> Result<BlockMark>;

    /// Close the innermost block, backpatching its size.
    fn end_block(&mut self, mark: BlockMark) -> Result<()>;

    /// Pad to the next octet boundary.
    fn align_to_byte(&mut self) -> Result<()>;

    /// Freeze the downstream; no further writes succeed.
    fn freeze(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Byte backend
// ---------------------------------------------------------------------------

/// Writes decompressed module bytes through a [`WriteCursor`].
///
/// Block sizes are reserved at maximum width and backpatched on exit: fixed
/// mode rewrites the padded prefix in place; minimized mode writes the true
/// varuint and shifts the payload down to close the gap.
#[derive(Debug)]
pub struct ByteWriter {
    cursor: WriteCursor,
    minimize_block_size: bool,
    open_blocks: Vec<BlockMark>,
}

impl ByteWriter {
    /// New byte backend over `cursor`.
    #[must_use]
    pub fn new(cursor: WriteCursor) -> Self {
        Self {
            cursor,
            minimize_block_size: false,
            open_blocks: Vec::new(),
        }
    }

    /// Choose minimized (true varuint) block size prefixes.
    #[must_use]
    pub fn with_minimized_blocks(mut self, minimize: bool) -> Self {
        self.minimize_block_size = minimize;
        self
    }

    /// Current byte address of the underlying cursor.
    #[must_use]
    pub fn address(&self) -> usize {
        self.cursor.address()
    }

    /// Borrow the underlying cursor.
    pub fn cursor_mut(&mut self) -> &mut WriteCursor {
        &mut self.cursor
    }
}

impl InterpWriter for ByteWriter {
    fn stream_type(&self) -> StreamType {
        StreamType::Byte
    }

    fn write_value(&mut self, value: IntValue, format: IntFormat) -> Result<()> {
        match format {
            IntFormat::Uint8 => self.cursor.write_u8(value as u8),
            IntFormat::Uint32 => self.cursor.write_uint32(value as u32),
            IntFormat::Uint64 => self.cursor.write_uint64(value),
            IntFormat::Varint32 => self.cursor.write_varint32(value as i64 as i32),
            IntFormat::Varint64 => self.cursor.write_varint64(value as i64),
            IntFormat::Varuint32 => self.cursor.write_varuint32(value as u32),
            IntFormat::Varuint64 => self.cursor.write_varuint64(value),
        }
    }

    fn write_bits(&mut self, value: IntValue, bits: u32) -> Result<()> {
        self.cursor.write_bits(value, bits)
    }

    fn write_header_value(&mut self, value: IntValue, format: IntFormat) -> Result<()> {
        self.write_value(value, format)
    }

    fn write_action(&mut self, action: PredefinedSymbol) -> Result<bool> {
        match action {
            PredefinedSymbol::BlockEnter | PredefinedSymbol::BlockEnterWriteonly => {
                let mark = self.begin_block()?;
                self.open_blocks.push(mark);
                Ok(true)
            }
            PredefinedSymbol::BlockExit | PredefinedSymbol::BlockExitWriteonly => {
                let mark = self
                    .open_blocks
                    .pop()
                    .ok_or_else(|| CasmError::internal("block exit with no open block"))?;
                self.end_block(mark)?;
                Ok(true)
            }
            PredefinedSymbol::Align => {
                self.align_to_byte()?;
                Ok(true)
            }
            PredefinedSymbol::File => Ok(false),
        }
    }

    fn begin_block(&mut self) -> Result<BlockMark> {
        let slot = self.cursor.address();
        self.cursor.write_fixed_block_size(0)?;
        Ok(BlockMark {
            slot,
            payload_start: self.cursor.address(),
        })
    }

    fn end_block(&mut self, mark: BlockMark) -> Result<()> {
        self.cursor.align_to_byte()?;
        let end = self.cursor.address();
        let size = (end - mark.payload_start) as u64;
        if self.minimize_block_size {
            let mut patch = self.cursor.at_address(mark.slot);
            patch.write_varuint_block_size(size)?;
            let new_payload_start = patch.address();
            let gap = mark.payload_start - new_payload_start;
            if gap > 0 {
                self.cursor
                    .move_block(mark.payload_start, new_payload_start, size as usize)?;
            }
        } else {
            let mut patch = self.cursor.at_address(mark.slot);
            patch.write_fixed_block_size(size)?;
        }
        Ok(())
    }

    fn align_to_byte(&mut self) -> Result<()> {
        self.cursor.align_to_byte()
    }

    fn freeze(&mut self) -> Result<()> {
        self.cursor.freeze()
    }
}

// ---------------------------------------------------------------------------
// Integer backend
// ---------------------------------------------------------------------------

/// Writes logical integer events through an [`IntStreamWriter`].
///
/// Block sizes become brackets; actual sizes are reintroduced when the
/// integer stream is serialized back to bytes.
#[derive(Debug)]
pub struct IntWriter {
    writer: IntStreamWriter,
}

impl IntWriter {
    /// New integer backend over `writer`.
    #[must_use]
    pub fn new(writer: IntStreamWriter) -> Self {
        Self { writer }
    }

    /// Borrow the underlying stream writer.
    pub fn writer_mut(&mut self) -> &mut IntStreamWriter {
        &mut self.writer
    }
}

impl InterpWriter for IntWriter {
    fn stream_type(&self) -> StreamType {
        StreamType::Int
    }

    fn write_value(&mut self, value: IntValue, format: IntFormat) -> Result<()> {
        self.writer.write_typed(value, format)
    }

    fn write_bits(&mut self, value: IntValue, _bits: u32) -> Result<()> {
        self.writer.write_typed(value, IntFormat::Varuint64)
    }

    fn write_header_value(&mut self, value: IntValue, format: IntFormat) -> Result<()> {
        self.writer.write_header_value(value, format)
    }

    fn write_action(&mut self, action: PredefinedSymbol) -> Result<bool> {
        match action {
            PredefinedSymbol::BlockEnter | PredefinedSymbol::BlockEnterWriteonly => {
                self.writer.write_block_enter()?;
                Ok(true)
            }
            PredefinedSymbol::BlockExit | PredefinedSymbol::BlockExitWriteonly => {
                self.writer.write_block_exit()?;
                Ok(true)
            }
            PredefinedSymbol::Align => {
                self.writer.write_align()?;
                Ok(true)
            }
            PredefinedSymbol::File => Ok(false),
        }
    }

    fn begin_block(&mut self) -> Result<BlockMark> {
        self.writer.write_block_enter()?;
        Ok(BlockMark {
            slot: 0,
            payload_start: 0,
        })
    }

    fn end_block(&mut self, _mark: BlockMark) -> Result<()> {
        self.writer.write_block_exit()
    }

    fn align_to_byte(&mut self) -> Result<()> {
        self.writer.write_align()
    }

    fn freeze(&mut self) -> Result<()> {
        self.writer.write_freeze_eof()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casm_stream::{ByteQueue, IntEvent, IntStream};

    #[test]
    fn fixed_block_backpatch() {
        let queue = ByteQueue::new().into_handle();
        let mut writer = ByteWriter::new(WriteCursor::new(queue.clone()));
        let mark = writer.begin_block().unwrap();
        for b in [1u8, 2, 3, 4, 5] {
            writer.write_value(u64::from(b), IntFormat::Uint8).unwrap();
        }
        writer.end_block(mark).unwrap();
        // 5-byte padded prefix holding 5, then the payload.
        let bytes = queue.borrow().to_vec();
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[5..], [1, 2, 3, 4, 5]);
        assert_eq!(bytes[0] & 0x7f, 5);
    }

    #[test]
    fn minimized_block_shifts_payload_down() {
        let queue = ByteQueue::new().into_handle();
        let mut writer =
            ByteWriter::new(WriteCursor::new(queue.clone())).with_minimized_blocks(true);
        let mark = writer.begin_block().unwrap();
        for b in [1u8, 2, 3, 4, 5] {
            writer.write_value(u64::from(b), IntFormat::Uint8).unwrap();
        }
        writer.end_block(mark).unwrap();
        // True varuint 0x05 plus 5 payload bytes: 6 bytes on the wire.
        assert_eq!(queue.borrow().to_vec(), vec![5, 1, 2, 3, 4, 5]);
        assert_eq!(writer.address(), 6);
    }

    #[test]
    fn int_writer_turns_blocks_into_brackets() {
        let stream = IntStream::new().into_handle();
        let mut writer = IntWriter::new(IntStreamWriter::new(stream.clone()));
        let mark = writer.begin_block().unwrap();
        writer.write_value(7, IntFormat::Varuint64).unwrap();
        writer.end_block(mark).unwrap();
        writer.freeze().unwrap();
        let stream = stream.borrow();
        assert_eq!(stream.event_at(0), Some(IntEvent::BlockEnter));
        assert_eq!(
            stream.event_at(1),
            Some(IntEvent::Value {
                value: 7,
                format: IntFormat::Varuint64
            })
        );
        assert_eq!(stream.event_at(2), Some(IntEvent::BlockExit));
        assert!(stream.is_frozen());
    }

    #[test]
    fn byte_writer_actions_nest() {
        let queue = ByteQueue::new().into_handle();
        let mut writer =
            ByteWriter::new(WriteCursor::new(queue.clone())).with_minimized_blocks(true);
        writer.write_action(PredefinedSymbol::BlockEnter).unwrap();
        writer.write_value(9, IntFormat::Uint8).unwrap();
        writer.write_action(PredefinedSymbol::BlockExit).unwrap();
        assert_eq!(queue.borrow().to_vec(), vec![1, 9]);
    }
}
