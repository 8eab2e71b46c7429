//! Module container <-> integer stream conversion.
//!
//! A module is `magic | version | section*`, each section a varuint-prefixed
//! name followed by a size-prefixed payload of varuint-encoded integers.
//! [`parse_module`] turns the bytes into the logical integer stream the
//! abbreviation engine consumes (values, block brackets, align events);
//! [`write_module`] inverts it, reintroducing size prefixes in either the
//! fixed or minimized encoding.

use casm_error::{CasmError, Result};
use casm_interp::{ByteWriter, InterpWriter};
use casm_stream::{IntEvent, IntStreamHandle, IntStreamReader, IntStreamWriter, ReadCursor};
use casm_types::{IntFormat, IntValue, WASM_BINARY_MAGIC, WASM_BINARY_VERSION};
use tracing::debug;

fn fill_headroom(read: &mut ReadCursor) -> Result<()> {
    while !read.has_enough_headroom() {
        read.fill_page()?;
    }
    Ok(())
}

/// Parse a module into `writer`'s integer stream and freeze it.
pub fn parse_module(read: &mut ReadCursor, writer: &mut IntStreamWriter) -> Result<()> {
    fill_headroom(read)?;
    let magic = read.read_uint32();
    if magic != WASM_BINARY_MAGIC {
        return Err(CasmError::BadMagic {
            found: magic,
            expected: WASM_BINARY_MAGIC,
        });
    }
    writer.write_typed(IntValue::from(magic), IntFormat::Uint32)?;
    let version = read.read_uint32();
    if version != WASM_BINARY_VERSION {
        return Err(CasmError::BadVersion { found: version });
    }
    writer.write_typed(IntValue::from(version), IntFormat::Uint32)?;

    loop {
        fill_headroom(read)?;
        if read.at_byte_eob() {
            break;
        }
        parse_section(read, writer)?;
    }
    writer.write_freeze_eof()
}

fn parse_section(read: &mut ReadCursor, writer: &mut IntStreamWriter) -> Result<()> {
    let name_size = read.read_varuint32()?;
    writer.write_typed(IntValue::from(name_size), IntFormat::Varuint32)?;
    let mut name = String::new();
    for _ in 0..name_size {
        fill_headroom(read)?;
        let byte = read.read_u8();
        if read.hit_eof() {
            return Err(CasmError::TruncatedName {
                expected: name_size as usize,
                actual: name.len(),
            });
        }
        writer.write_typed(IntValue::from(byte), IntFormat::Uint8)?;
        name.push(byte as char);
    }
    debug!("parsing section '{}'", name);

    let size = read.read_block_size()?;
    read.push_eob_address(size)?;
    writer.write_block_enter()?;
    loop {
        fill_headroom(read)?;
        if read.at_byte_eob() {
            break;
        }
        let value = read.read_varuint64()?;
        if read.address() > read.eob_limit() {
            return Err(CasmError::BlockSizeOverflow {
                size,
                limit: read.eob_limit() as u64,
            });
        }
        writer.write_typed(value, IntFormat::Varuint64)?;
    }
    read.pop_eob_address();
    writer.write_block_exit()?;
    read.align_to_byte();
    writer.write_align()
}

/// Serialize a logical integer stream back into module bytes and freeze
/// the output. Block size encoding (fixed or minimized) follows the
/// writer's configuration.
pub fn write_module(stream: IntStreamHandle, out: ByteWriter) -> Result<()> {
    let mut reader = IntStreamReader::new(stream);
    let mut out = out;
    let magic = reader.read()?;
    out.write_value(magic, IntFormat::Uint32)?;
    let version = reader.read()?;
    out.write_value(version, IntFormat::Uint32)?;

    while !reader.at_end() {
        if matches!(reader.peek_event(), Some(IntEvent::Align)) {
            reader.next_event();
            out.align_to_byte()?;
            continue;
        }
        write_section(&mut reader, &mut out)?;
    }
    out.freeze()
}

fn write_section(reader: &mut IntStreamReader, out: &mut ByteWriter) -> Result<()> {
    let name_size = reader.read()?;
    out.write_value(name_size, IntFormat::Varuint32)?;
    for _ in 0..name_size {
        let byte = reader.read()?;
        out.write_value(byte, IntFormat::Uint8)?;
    }
    reader.open_block()?;
    let mark = out.begin_block()?;
    while !reader.at_eob() {
        let value = reader.read()?;
        out.write_value(value, IntFormat::Varuint64)?;
    }
    reader.close_block()?;
    out.end_block(mark)?;
    out.align_to_byte()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use casm_stream::{ByteQueue, IntStream, WriteCursor};

    fn sample_module(values: &[&[u64]]) -> Vec<u8> {
        let queue = ByteQueue::new().into_handle();
        let mut cursor = WriteCursor::new(queue.clone());
        cursor.write_uint32(WASM_BINARY_MAGIC).unwrap();
        cursor.write_uint32(WASM_BINARY_VERSION).unwrap();
        for (index, payload) in values.iter().enumerate() {
            let name = format!("s{index}");
            cursor.write_varuint32(name.len() as u32).unwrap();
            for b in name.bytes() {
                cursor.write_u8(b).unwrap();
            }
            let body = {
                let q = ByteQueue::new().into_handle();
                let mut c = WriteCursor::new(q.clone());
                for &v in *payload {
                    c.write_varuint64(v).unwrap();
                }
                let result = q.borrow().to_vec();
                result
            };
            cursor.write_fixed_block_size(body.len() as u64).unwrap();
            for b in body {
                cursor.write_u8(b).unwrap();
            }
        }
        let result = queue.borrow().to_vec();
        result
    }

    fn parse(bytes: &[u8]) -> IntStreamHandle {
        let queue = ByteQueue::from_bytes(bytes).into_handle();
        let mut read = ReadCursor::new(queue);
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream.clone());
        parse_module(&mut read, &mut writer).unwrap();
        stream
    }

    #[test]
    fn parse_and_write_round_trip() {
        let bytes = sample_module(&[&[300, 1, 2], &[7]]);
        let stream = parse(&bytes);

        let out_queue = ByteQueue::new().into_handle();
        let out = ByteWriter::new(WriteCursor::new(out_queue.clone()));
        write_module(stream, out).unwrap();
        assert_eq!(out_queue.borrow().to_vec(), bytes);
    }

    #[test]
    fn parse_emits_brackets_and_aligns() {
        let bytes = sample_module(&[&[5, 5]]);
        let stream = parse(&bytes);
        let stream = stream.borrow();
        let events: Vec<_> = (0..stream.len())
            .map(|i| stream.event_at(i).unwrap())
            .collect();
        // magic, version, name size, 2 name bytes, enter, 2 values, exit,
        // align.
        assert_eq!(events.len(), 10);
        assert_eq!(events[5], IntEvent::BlockEnter);
        assert_eq!(events[8], IntEvent::BlockExit);
        assert_eq!(events[9], IntEvent::Align);
        assert!(stream.is_frozen());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut bytes = sample_module(&[]);
        bytes[0] ^= 0xff;
        let queue = ByteQueue::from_bytes(&bytes).into_handle();
        let mut read = ReadCursor::new(queue);
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream);
        assert!(matches!(
            parse_module(&mut read, &mut writer),
            Err(CasmError::BadMagic { .. })
        ));
    }

    #[test]
    fn varint_crossing_block_end_is_fatal() {
        let queue = ByteQueue::new().into_handle();
        let mut cursor = WriteCursor::new(queue.clone());
        cursor.write_uint32(WASM_BINARY_MAGIC).unwrap();
        cursor.write_uint32(WASM_BINARY_VERSION).unwrap();
        cursor.write_varuint32(1).unwrap();
        cursor.write_u8(b'x').unwrap();
        // Block of one byte whose only byte claims a continuation.
        cursor.write_fixed_block_size(1).unwrap();
        cursor.write_u8(0x80).unwrap();
        cursor.write_u8(0x01).unwrap();
        let bytes = queue.borrow().to_vec();

        let queue = ByteQueue::from_bytes(&bytes).into_handle();
        let mut read = ReadCursor::new(queue);
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream);
        assert!(parse_module(&mut read, &mut writer).is_err());
    }

    #[test]
    fn minimized_output_is_smaller() {
        let bytes = sample_module(&[&[1, 2, 3]]);
        let stream = parse(&bytes);
        let out_queue = ByteQueue::new().into_handle();
        let out =
            ByteWriter::new(WriteCursor::new(out_queue.clone())).with_minimized_blocks(true);
        write_module(stream, out).unwrap();
        assert!(out_queue.borrow().len() < bytes.len());
    }
}
