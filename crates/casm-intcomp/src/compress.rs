//! The compression and decompression drivers.
//!
//! Compression: parse the module into an integer stream while the count
//! trie collects subsequence statistics, select the cut set, generate the
//! decoder AST, flatten it, re-read the integer stream through the
//! abbreviation matcher, and serialize everything as CASM bytes.
//! Decompression: rebuild the decoder from the prologue, interpret it over
//! the payload into a fresh integer stream, and serialize that stream back
//! into module bytes.

use std::io::Read;

use casm_ast::Flattener;
use casm_error::{CasmError, Result};
use casm_interp::{ByteWriter, IntWriter, Interpreter};
use casm_stream::{ByteQueue, IntStream, IntStreamWriter, QueueHandle, ReadCursor, WriteCursor};
use casm_types::AbbrevIndex;
use tracing::{debug, info};

use crate::abbrev_writer::AbbrevAssignWriter;
use crate::assign::assign_abbreviations;
use crate::codegen::AbbreviationCodegen;
use crate::collect::collect_stream;
use crate::count_node::CountTrie;
use crate::emit::{emit_casm, read_casm_prologue};
use crate::flags::CompressionFlags;
use crate::huffman::HuffmanTree;
use crate::module::{parse_module, write_module};
use crate::report::{build_report, UsageReport};

/// Compresses modules based on integer usage.
#[derive(Debug, Default)]
pub struct IntCompressor {
    flags: CompressionFlags,
}

impl IntCompressor {
    /// New compressor with the given tunables.
    #[must_use]
    pub fn new(flags: CompressionFlags) -> Self {
        Self { flags }
    }

    /// Compress an in-memory module.
    pub fn compress_bytes(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.compress_queue(ByteQueue::from_bytes(input).into_handle())
            .map(|(bytes, _)| bytes)
    }

    /// Compress a pull source (file, pipe).
    pub fn compress_reader(&self, source: Box<dyn Read>) -> Result<Vec<u8>> {
        self.compress_queue(ByteQueue::with_source(source).into_handle())
            .map(|(bytes, _)| bytes)
    }

    /// Compress and also return the usage report.
    pub fn compress_bytes_with_report(&self, input: &[u8]) -> Result<(Vec<u8>, UsageReport)> {
        self.compress_queue(ByteQueue::from_bytes(input).into_handle())
    }

    fn compress_queue(&self, queue: QueueHandle) -> Result<(Vec<u8>, UsageReport)> {
        let flags = &self.flags;
        let mut read = ReadCursor::new(queue);

        // Collect phase: module bytes -> logical integer stream.
        let raw = IntStream::new().into_handle();
        {
            let mut writer = IntStreamWriter::new(raw.clone());
            parse_module(&mut read, &mut writer)?;
        }
        let mut trie = CountTrie::new();
        collect_stream(&mut trie, raw.clone(), flags.length_limit, flags.collection);

        // Selection.
        let assignments = assign_abbreviations(&mut trie, &flags.cutoff_params());
        let huffman = if flags.use_huffman {
            let mut weights: Vec<(AbbrevIndex, u64)> = Vec::with_capacity(assignments.len());
            for &id in &assignments {
                let node = trie.node(id);
                let index = node.abbrev().ok_or(CasmError::MissingAbbrevIndex)?;
                weights.push((index, node.count().max(1)));
            }
            HuffmanTree::build(&weights)
        } else {
            None
        };

        // Codegen the read-side decoder and flatten it.
        let codegen =
            AbbreviationCodegen::new(flags, &trie, huffman.as_ref(), &assignments, true);
        let (symtab, _root) = codegen.generate()?;
        let ast_stream = IntStream::new().into_handle();
        let flattener = Flattener::new(&symtab, IntStreamWriter::new(ast_stream.clone()));
        if !flattener.flatten()? {
            return Err(CasmError::internal("generated decoder failed to flatten"));
        }

        // Abbreviation pass over the collected stream.
        let payload = IntStream::new().into_handle();
        let mut abbrev = AbbrevAssignWriter::new(
            &trie,
            IntStreamWriter::new(payload.clone()),
            flags.length_limit,
        )
        .with_align_at_eof(flags.use_huffman);
        abbrev.run(raw)?;

        // Wire serialization.
        let out_queue = ByteQueue::new().into_handle();
        emit_casm(
            &ast_stream,
            &payload,
            WriteCursor::new(out_queue.clone()),
            flags.minimize_block_size,
            flags.abbrev_format,
            huffman.as_ref().map(HuffmanTree::paths).as_ref(),
        )?;

        let bytes = out_queue.borrow().to_vec();
        info!(
            "compressed with {} abbreviations, {} bytes out",
            assignments.len(),
            bytes.len()
        );
        Ok((bytes, build_report(&trie)))
    }
}

/// Decompress a CASM stream back into module bytes.
pub fn decompress_bytes(input: &[u8], minimize_block_size: bool) -> Result<Vec<u8>> {
    decompress_queue(
        ByteQueue::from_bytes(input).into_handle(),
        minimize_block_size,
    )
}

/// Decompress a pull source.
pub fn decompress_reader(source: Box<dyn Read>, minimize_block_size: bool) -> Result<Vec<u8>> {
    decompress_queue(
        ByteQueue::with_source(source).into_handle(),
        minimize_block_size,
    )
}

fn decompress_queue(queue: QueueHandle, minimize_block_size: bool) -> Result<Vec<u8>> {
    let mut read = ReadCursor::new(queue);
    let prologue = read_casm_prologue(&mut read)?;
    if prologue.uses_cism {
        return Err(CasmError::not_implemented(
            "decoding a cism-model stream requires the host algorithm",
        ));
    }
    let file_sym = prologue
        .symtab
        .get_symbol("file")
        .ok_or_else(|| CasmError::undefined("file"))?;
    let define = prologue
        .symtab
        .symbol_define(file_sym)
        .ok_or_else(|| CasmError::undefined("file"))?;
    debug!("decoder rebuilt, interpreting payload");

    let decoded = IntStream::new().into_handle();
    let writer = IntWriter::new(IntStreamWriter::new(decoded.clone()));
    let mut interp = Interpreter::new(read, writer, &prologue.symtab);
    interp.eval(define)?;
    interp.writer_mut().writer_mut().write_freeze_eof()?;

    let out_queue = ByteQueue::new().into_handle();
    let out = ByteWriter::new(WriteCursor::new(out_queue.clone()))
        .with_minimized_blocks(minimize_block_size);
    write_module(decoded, out)?;
    let bytes = out_queue.borrow().to_vec();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casm_stream::WriteCursor as Wc;
    use casm_types::{IntFormat, WASM_BINARY_MAGIC, WASM_BINARY_VERSION};

    fn sample_module(sections: &[(&str, &[u64])]) -> Vec<u8> {
        let queue = ByteQueue::new().into_handle();
        let mut cursor = Wc::new(queue.clone());
        cursor.write_uint32(WASM_BINARY_MAGIC).unwrap();
        cursor.write_uint32(WASM_BINARY_VERSION).unwrap();
        for (name, payload) in sections {
            cursor.write_varuint32(name.len() as u32).unwrap();
            for b in name.bytes() {
                cursor.write_u8(b).unwrap();
            }
            let body = {
                let q = ByteQueue::new().into_handle();
                let mut c = Wc::new(q.clone());
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

    #[test]
    fn abbreviation_round_trip() {
        let module = sample_module(&[(
            "code",
            &[10, 20, 30, 10, 20, 30, 10, 20, 30],
        )]);
        let flags = CompressionFlags {
            count_cutoff: 2,
            weight_cutoff: 2,
            length_limit: 3,
            ..CompressionFlags::default()
        };
        let compressor = IntCompressor::new(flags);
        let (compressed, report) = compressor.compress_bytes_with_report(&module).unwrap();
        // The repeated triple earned an abbreviation.
        assert!(report
            .entries
            .iter()
            .any(|e| e.path == vec![10, 20, 30] && e.abbreviation.is_some()));

        let decompressed = decompress_bytes(&compressed, false).unwrap();
        assert_eq!(decompressed, module);
    }

    #[test]
    fn multi_section_round_trip() {
        let module = sample_module(&[
            ("types", &[1, 1, 1, 1, 2, 3]),
            ("code", &[300, 4, 300, 4, 300, 4]),
            ("names", &[7]),
        ]);
        let compressor = IntCompressor::new(CompressionFlags::default());
        let compressed = compressor.compress_bytes(&module).unwrap();
        let decompressed = decompress_bytes(&compressed, false).unwrap();
        assert_eq!(decompressed, module);
    }

    #[test]
    fn huffman_round_trip() {
        let module = sample_module(&[(
            "code",
            &[10, 20, 30, 10, 20, 30, 10, 20, 30, 5, 5, 5, 5],
        )]);
        let flags = CompressionFlags {
            count_cutoff: 2,
            weight_cutoff: 2,
            length_limit: 3,
            use_huffman: true,
            ..CompressionFlags::default()
        };
        let compressor = IntCompressor::new(flags);
        let compressed = compressor.compress_bytes(&module).unwrap();
        let decompressed = decompress_bytes(&compressed, false).unwrap();
        assert_eq!(decompressed, module);
    }

    #[test]
    fn minimized_blocks_round_trip() {
        let module = sample_module(&[("m", &[9, 9, 9, 9])]);
        let flags = CompressionFlags {
            minimize_block_size: true,
            ..CompressionFlags::default()
        };
        let compressor = IntCompressor::new(flags);
        let compressed = compressor.compress_bytes(&module).unwrap();
        // Minimized output must still decompress to the fixed-size form it
        // was parsed from.
        let decompressed = decompress_bytes(&compressed, false).unwrap();
        assert_eq!(decompressed, module);
    }

    #[test]
    fn empty_module_round_trip() {
        let module = sample_module(&[]);
        let compressor = IntCompressor::new(CompressionFlags::default());
        let compressed = compressor.compress_bytes(&module).unwrap();
        let decompressed = decompress_bytes(&compressed, false).unwrap();
        assert_eq!(decompressed, module);
    }

    #[test]
    fn cism_stream_is_rejected_on_decode() {
        let module = sample_module(&[("code", &[1, 1, 1, 1])]);
        let flags = CompressionFlags {
            use_cism_model: true,
            ..CompressionFlags::default()
        };
        let compressor = IntCompressor::new(flags);
        let compressed = compressor.compress_bytes(&module).unwrap();
        assert!(matches!(
            decompress_bytes(&compressed, false),
            Err(CasmError::NotImplemented(_))
        ));
    }

    #[test]
    fn random_payloads_round_trip() {
        use proptest::prelude::*;
        let mut runner = proptest::test_runner::TestRunner::default();
        runner
            .run(
                &prop::collection::vec(0u64..1000, 0..40),
                |values| {
                    let module = sample_module(&[("p", values.as_slice())]);
                    let compressor = IntCompressor::new(CompressionFlags::default());
                    let compressed = compressor.compress_bytes(&module).unwrap();
                    let decompressed = decompress_bytes(&compressed, false).unwrap();
                    prop_assert_eq!(decompressed, module);
                    Ok(())
                },
            )
            .unwrap();
    }

    #[test]
    fn garbage_input_is_a_format_error() {
        let compressor = IntCompressor::new(CompressionFlags::default());
        let err = compressor.compress_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap_err();
        assert!(err.is_format());
    }
}
