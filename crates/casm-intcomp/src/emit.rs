//! CASM wire serialization.
//!
//! Layout: header pairs (bit-exact), then the flattened decoder AST inside
//! one size-prefixed block, then the abbreviated payload until freeze-eof.
//! AST-region values are uniformly varuint64; payload values carry the
//! format each write op chose, with abbreviation indices either in the
//! configured abbreviation format or as Huffman bit codes.

use std::collections::HashMap;

use casm_ast::{unflatten, NodeId, SymbolTable};
use casm_error::{CasmError, Result};
use casm_interp::{ByteWriter, InterpWriter};
use casm_stream::{IntEvent, IntStream, IntStreamHandle, IntStreamReader, ReadCursor, WriteCursor};
use casm_types::{
    IntFormat, IntValue, CASM_BINARY_MAGIC, CASM_BINARY_VERSION, CISM_BINARY_MAGIC,
    WASM_BINARY_MAGIC,
};

/// Serialize the flattened AST stream and the abbreviated payload stream
/// into CASM bytes, freezing the output.
pub fn emit_casm(
    ast_stream: &IntStreamHandle,
    payload: &IntStreamHandle,
    cursor: WriteCursor,
    minimize_block_size: bool,
    abbrev_format: IntFormat,
    huffman_paths: Option<&HashMap<u32, Vec<u8>>>,
) -> Result<()> {
    let mut out = ByteWriter::new(cursor).with_minimized_blocks(minimize_block_size);

    for &(value, format) in ast_stream.borrow().header() {
        out.write_header_value(value, format)?;
    }

    let mark = out.begin_block()?;
    let mut reader = IntStreamReader::new(ast_stream.clone());
    while let Some(event) = reader.next_event() {
        match event {
            IntEvent::Value { value, .. } => {
                out.write_value(value, IntFormat::Varuint64)?;
            }
            IntEvent::BlockEnter => {
                out.write_action(casm_ast::PredefinedSymbol::BlockEnter)?;
            }
            IntEvent::BlockExit => {
                out.write_action(casm_ast::PredefinedSymbol::BlockExit)?;
            }
            IntEvent::Abbrev { .. } | IntEvent::Align => {
                return Err(CasmError::internal("stray event in flattened stream"));
            }
        }
    }
    out.end_block(mark)?;

    let mut reader = IntStreamReader::new(payload.clone());
    while let Some(event) = reader.next_event() {
        match event {
            IntEvent::Value { value, format } => {
                out.write_value(value, format)?;
            }
            IntEvent::Abbrev { value } => match huffman_paths {
                Some(paths) => {
                    let bits = paths.get(&(value as u32)).ok_or(CasmError::NoSuchCase {
                        selector: value,
                    })?;
                    for &bit in bits {
                        out.write_bits(IntValue::from(bit), 1)?;
                    }
                }
                None => out.write_value(value, abbrev_format)?,
            },
            IntEvent::Align => out.align_to_byte()?,
            IntEvent::BlockEnter | IntEvent::BlockExit => {
                return Err(CasmError::internal("stray bracket in abbreviated payload"));
            }
        }
    }
    out.freeze()
}

/// The prologue of a CASM stream: its rebuilt decoder plus what the header
/// pairs declared.
pub struct CasmPrologue {
    /// Symbol table holding the unflattened decoder.
    pub symtab: SymbolTable,
    /// The installed root.
    pub root: NodeId,
    /// Whether the stream was produced under the CISM model.
    pub uses_cism: bool,
}

/// Read the header pairs and the flattened AST block, leaving `read` at
/// the first payload byte.
pub fn read_casm_prologue(read: &mut ReadCursor) -> Result<CasmPrologue> {
    while !read.has_enough_headroom() {
        read.fill_page()?;
    }
    let magic = read.read_uint32();
    if magic != CASM_BINARY_MAGIC {
        return Err(CasmError::BadMagic {
            found: magic,
            expected: CASM_BINARY_MAGIC,
        });
    }
    let version = read.read_uint32();
    if version != CASM_BINARY_VERSION {
        return Err(CasmError::BadVersion { found: version });
    }
    let mut pairs: Vec<(IntValue, IntFormat)> = vec![
        (IntValue::from(magic), IntFormat::Uint32),
        (IntValue::from(version), IntFormat::Uint32),
    ];

    read.push_peek_pos();
    let next = read.read_uint32();
    read.pop_peek_pos();
    let (extra_pairs, uses_cism) = if next == CISM_BINARY_MAGIC {
        (4, true)
    } else if next == WASM_BINARY_MAGIC {
        (2, false)
    } else {
        (0, false)
    };
    for _ in 0..extra_pairs {
        let value = read.read_uint32();
        pairs.push((IntValue::from(value), IntFormat::Uint32));
    }

    let size = read.read_block_size()?;
    read.push_eob_address(size)?;
    let stream = IntStream::new().into_handle();
    {
        let mut writer = casm_stream::IntStreamWriter::new(stream.clone());
        for (value, format) in pairs {
            writer.write_header_value(value, format)?;
        }
        while !read.at_byte_eob() {
            let value = read.read_varuint64()?;
            writer.write(value)?;
        }
        writer.write_freeze_eof()?;
    }
    read.pop_eob_address();

    let (symtab, root) = unflatten(stream)?;
    Ok(CasmPrologue {
        symtab,
        root,
        uses_cism,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use casm_ast::{structurally_equal, Flattener, NodeType, PredefinedSymbol};
    use casm_stream::{ByteQueue, IntStreamWriter};

    fn tiny_decoder() -> (SymbolTable, NodeId) {
        let mut symtab = SymbolTable::new();
        let magic = symtab.create_int(NodeType::U32Const, IntValue::from(CASM_BINARY_MAGIC));
        let version =
            symtab.create_int(NodeType::U32Const, IntValue::from(CASM_BINARY_VERSION));
        let header = symtab.create_with_kids(NodeType::FileHeader, &[magic, version]);
        let sym = symtab.predefined(PredefinedSymbol::File);
        let params = symtab.create(NodeType::NoParams);
        let locals = symtab.create(NodeType::NoLocals);
        let body = symtab.create(NodeType::Void);
        let define = symtab.create_with_kids(NodeType::Define, &[sym, params, locals, body]);
        let root = symtab.create_with_kids(NodeType::File, &[header, define]);
        symtab.install(root).unwrap();
        (symtab, root)
    }

    #[test]
    fn prologue_round_trips_through_bytes() {
        let (symtab, root) = tiny_decoder();
        let ast_stream = IntStream::new().into_handle();
        let flattener = Flattener::new(&symtab, IntStreamWriter::new(ast_stream.clone()));
        assert!(flattener.flatten().unwrap());

        let payload = IntStream::new().into_handle();
        IntStreamWriter::new(payload.clone()).write_freeze_eof().unwrap();

        let queue = ByteQueue::new().into_handle();
        emit_casm(
            &ast_stream,
            &payload,
            WriteCursor::new(queue.clone()),
            true,
            IntFormat::Varuint64,
            None,
        )
        .unwrap();

        let mut read = ReadCursor::new(queue);
        let prologue = read_casm_prologue(&mut read).unwrap();
        assert!(!prologue.uses_cism);
        assert!(structurally_equal(
            &symtab,
            root,
            &prologue.symtab,
            prologue.root
        ));
        // The cursor sits exactly at the (empty) payload.
        assert!(read.at_byte_eob());
    }

    #[test]
    fn bad_casm_magic_is_fatal() {
        let queue = ByteQueue::from_bytes(&[0, 1, 2, 3, 4, 5, 6, 7]).into_handle();
        let mut read = ReadCursor::new(queue);
        assert!(matches!(
            read_casm_prologue(&mut read),
            Err(CasmError::BadMagic { .. })
        ));
    }

    #[test]
    fn huffman_payload_emits_bits() {
        let (symtab, _root) = tiny_decoder();
        let ast_stream = IntStream::new().into_handle();
        let flattener = Flattener::new(&symtab, IntStreamWriter::new(ast_stream.clone()));
        assert!(flattener.flatten().unwrap());

        let payload = IntStream::new().into_handle();
        {
            let mut writer = IntStreamWriter::new(payload.clone());
            for _ in 0..8 {
                writer.write_abbrev(0).unwrap();
            }
            writer.write_freeze_eof().unwrap();
        }

        let mut paths = HashMap::new();
        paths.insert(0u32, vec![1u8]);
        let queue = ByteQueue::new().into_handle();
        emit_casm(
            &ast_stream,
            &payload,
            WriteCursor::new(queue.clone()),
            true,
            IntFormat::Varuint64,
            Some(&paths),
        )
        .unwrap();

        // Eight one-bit codes pack into a single 0xff byte at the tail.
        let bytes = queue.borrow().to_vec();
        assert_eq!(bytes[bytes.len() - 1], 0xff);
    }
}
