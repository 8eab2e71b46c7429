//! Abbreviation engine for the CASM compressor.
//!
//! Counts integer subsequence frequencies in a module's logical integer
//! stream, selects a cut set to abbreviate, produces an abbreviation table
//! plus the filter AST that decodes it (optionally behind a canonical
//! prefix code), and streams values through a windowed longest-prefix
//! matcher that substitutes abbreviation indices for matched runs.

mod abbrev_writer;
mod assign;
mod codegen;
mod collect;
mod compress;
mod count_node;
mod emit;
mod flags;
mod huffman;
mod module;
mod report;

pub use abbrev_writer::AbbrevAssignWriter;
pub use assign::{assign_abbreviations, CutoffParams, SYNTHETIC_ASSIGNMENTS};
pub use codegen::AbbreviationCodegen;
pub use collect::{collect_stream, CollectionFlags, Collector};
pub use compress::{decompress_bytes, decompress_reader, IntCompressor};
pub use count_node::{CountKind, CountNode, CountNodeId, CountTrie};
pub use emit::{emit_casm, read_casm_prologue, CasmPrologue};
pub use flags::CompressionFlags;
pub use huffman::{HuffmanNode, HuffmanTree};
pub use module::{parse_module, write_module};
pub use report::{build_report, UsageEntry, UsageReport};
