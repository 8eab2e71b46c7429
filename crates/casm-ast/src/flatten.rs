//! Serializes an installed filter AST into the CASM integer opcode stream.
//!
//! Nodes are written in postorder: children first, then the node's opcode,
//! plus an explicit child count for variable-arity tags. Integer-carrying
//! nodes append `0` when the payload is the format's zero element, else
//! `format+1` followed by the value. `File` children are emitted inline;
//! header nodes emit their pairs to the stream's out-of-band header (plus an
//! in-stream marker so the inverse reader can rebuild the node); sections
//! are bracketed by block markers and carry a snapshot of their private
//! symbol index.

use casm_error::Result;
use casm_stream::IntStreamWriter;
use casm_types::{IntFormat, StreamKind};
use tracing::error;

use crate::node::{NodeId, Payload};
use crate::node_type::{Arity, NodeType};
use crate::symbol_table::{SectionSymbolTable, SymbolTable};
use crate::text::abbrev_text;

/// Symbol reference encodings inside the opcode stream.
pub(crate) const SYMBOL_PREDEFINED: u64 = 0;
pub(crate) const SYMBOL_INDEXED: u64 = 1;
pub(crate) const SYMBOL_NAMED: u64 = 2;

/// Wire encoding of a stream-check node.
pub(crate) fn stream_encoding(kind: StreamKind, ty: casm_types::StreamType) -> u64 {
    let kind_code = match kind {
        StreamKind::Input => 0u64,
        StreamKind::Output => 1,
    };
    kind_code * 4 + ty as u64
}

/// Traverses an installed filter AST and writes the CASM opcode stream.
///
/// AST problems (unexpected node kinds, bad header literals, symbols with no
/// index space) are reported and accumulate on an error flag; the stream is
/// still drained to freeze-eof and [`Flattener::flatten`] returns `false`.
/// Only stream-level failures abort with an `Err`.
pub struct Flattener<'a> {
    symtab: &'a SymbolTable,
    writer: IntStreamWriter,
    section_symtab: SectionSymbolTable,
    in_section: bool,
    has_errors: bool,
}

impl<'a> Flattener<'a> {
    /// New flattener writing to `writer`.
    pub fn new(symtab: &'a SymbolTable, writer: IntStreamWriter) -> Self {
        Self {
            symtab,
            writer,
            section_symtab: SectionSymbolTable::new(),
            in_section: false,
            has_errors: false,
        }
    }

    /// Whether any AST error has been reported.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    /// Flatten the installed root. Returns `false` if any AST error was
    /// reported; the output is frozen either way.
    pub fn flatten(mut self) -> Result<bool> {
        match self.symtab.installed_root() {
            Some(root) => self.flatten_node(root)?,
            None => self.report("No algorithm installed", None),
        }
        self.writer.write_freeze_eof()?;
        Ok(!self.has_errors)
    }

    fn report(&mut self, message: &str, node: Option<NodeId>) {
        match node {
            Some(id) => error!("{}: {}", message, abbrev_text(self.symtab, id)),
            None => error!("{}", message),
        }
        self.has_errors = true;
    }

    fn write_opcode(&mut self, ty: NodeType) -> Result<()> {
        self.writer.write(u64::from(ty.opcode()))
    }

    #[allow(clippy::too_many_lines)]
    fn flatten_node(&mut self, id: NodeId) -> Result<()> {
        if self.has_errors {
            return Ok(());
        }
        let node = self.symtab.node(id);
        let ty = node.ty();
        if ty.is_int_node() {
            self.write_opcode(ty)?;
            if node.is_default_value() {
                self.writer.write(0)?;
            } else {
                let format = node.format().unwrap_or(IntFormat::Varuint64);
                self.writer.write(u64::from(format.code()) + 1)?;
                self.writer.write(node.value().unwrap_or(0))?;
            }
            return Ok(());
        }
        match ty {
            NodeType::UnknownSection => {
                self.report("Unexpected s-expression, can't write", Some(id));
            }
            NodeType::File => {
                for &kid in node.kids() {
                    self.flatten_node(kid)?;
                }
            }
            NodeType::FileHeader | NodeType::ReadHeader | NodeType::WriteHeader => {
                // Validate before emitting anything for this node.
                for &kid in node.kids() {
                    let kid_node = self.symtab.node(kid);
                    if !kid_node.ty().is_literal_const() {
                        self.report("Unrecognized literal constant", Some(kid));
                        return Ok(());
                    }
                    if !kid_node.defines_int_type_format() {
                        self.report("Bad literal constant", Some(kid));
                        return Ok(());
                    }
                }
                self.write_opcode(ty)?;
                self.writer.write(node.num_kids() as u64)?;
                for &kid in node.kids() {
                    let kid_node = self.symtab.node(kid);
                    let value = kid_node.value().unwrap_or(0);
                    let format = kid_node.format().unwrap_or(IntFormat::Varuint64);
                    self.writer.write_header_value(value, format)?;
                }
            }
            NodeType::Stream => {
                let Payload::Stream { kind, ty: stream_ty } = *node.payload() else {
                    self.report("Stream node without stream payload", Some(id));
                    return Ok(());
                };
                self.write_opcode(ty)?;
                self.writer.write(stream_encoding(kind, stream_ty))?;
            }
            NodeType::Section => {
                self.writer.write_block_enter()?;
                self.section_symtab.install_section(self.symtab, id);
                self.in_section = true;
                let vector = self.section_symtab.vector().to_vec();
                self.writer.write(vector.len() as u64)?;
                for sym in vector {
                    let name = self.symtab.symbol_name(sym).unwrap_or("").to_owned();
                    self.writer.write(name.len() as u64)?;
                    for byte in name.bytes() {
                        self.writer.write(u64::from(byte))?;
                    }
                }
                for &kid in node.kids() {
                    self.flatten_node(kid)?;
                }
                self.writer
                    .write_typed(u64::from(ty.opcode()), IntFormat::Uint8)?;
                self.writer.write_block_exit()?;
                self.section_symtab.clear();
                self.in_section = false;
            }
            NodeType::Symbol => {
                self.write_opcode(ty)?;
                if let Some(predefined) = self.symtab.symbol_predefined(id) {
                    self.writer.write(SYMBOL_PREDEFINED)?;
                    self.writer.write(u64::from(predefined.code()))?;
                } else if self.in_section {
                    match self.section_symtab.get_index(id) {
                        Some(index) => {
                            self.writer.write(SYMBOL_INDEXED)?;
                            self.writer.write(u64::from(index))?;
                        }
                        None => {
                            self.report("Symbol missing from section index", Some(id));
                        }
                    }
                } else {
                    let name = self.symtab.symbol_name(id).unwrap_or("").to_owned();
                    self.writer.write(SYMBOL_NAMED)?;
                    self.writer.write(name.len() as u64)?;
                    for byte in name.bytes() {
                        self.writer.write(u64::from(byte))?;
                    }
                }
            }
            _ => match ty.arity() {
                Arity::Fixed(expected) => {
                    if node.num_kids() != expected {
                        self.report("Wrong number of children", Some(id));
                        return Ok(());
                    }
                    for &kid in node.kids() {
                        self.flatten_node(kid)?;
                    }
                    self.write_opcode(ty)?;
                }
                Arity::Variable => {
                    for &kid in node.kids() {
                        self.flatten_node(kid)?;
                    }
                    self.write_opcode(ty)?;
                    self.writer.write(node.num_kids() as u64)?;
                }
                Arity::Special => {
                    self.report("Unexpected s-expression, can't write", Some(id));
                }
            },
        }
        Ok(())
    }
}
