//! Rebuilds a filter AST from a CASM opcode stream.
//!
//! The inverse of [`Flattener`](crate::Flattener): a postorder stack
//! machine dispatching on the node-type table. Integer payloads, symbol
//! references, stream encodings, header markers, and section brackets all
//! reverse their flatten rules; the surviving node stack becomes the
//! children of a fresh `File` root, which is installed before returning.

use casm_error::{CasmError, Result};
use casm_stream::{IntEvent, IntStreamHandle, IntStreamReader};
use casm_types::{IntFormat, StreamKind, StreamType};

use crate::flatten::{SYMBOL_INDEXED, SYMBOL_NAMED, SYMBOL_PREDEFINED};
use crate::node::{NodeId, PredefinedSymbol};
use crate::node_type::{Arity, NodeType};
use crate::symbol_table::{SectionSymbolTable, SymbolTable};

/// Read `stream` back into a symbol table with an installed root.
pub fn unflatten(stream: IntStreamHandle) -> Result<(SymbolTable, NodeId)> {
    Unflattener::new(stream).run()
}

struct Unflattener {
    reader: IntStreamReader,
    symtab: SymbolTable,
    stack: Vec<NodeId>,
    section_symtab: SectionSymbolTable,
    /// Stack depth at the most recent unmatched block enter.
    section_start: Option<usize>,
    header_index: usize,
}

impl Unflattener {
    fn new(stream: IntStreamHandle) -> Self {
        Self {
            reader: IntStreamReader::new(stream),
            symtab: SymbolTable::new(),
            stack: Vec::new(),
            section_symtab: SectionSymbolTable::new(),
            section_start: None,
            header_index: 0,
        }
    }

    fn run(mut self) -> Result<(SymbolTable, NodeId)> {
        while let Some(event) = self.reader.next_event() {
            match event {
                IntEvent::Value { value, .. } => self.dispatch(value)?,
                IntEvent::BlockEnter => self.enter_section()?,
                IntEvent::BlockExit => {
                    return Err(CasmError::internal("unmatched section block exit"));
                }
                IntEvent::Align | IntEvent::Abbrev { .. } => {
                    return Err(CasmError::internal("unexpected event in opcode stream"));
                }
            }
        }
        let kids = std::mem::take(&mut self.stack);
        let root = self.symtab.create_with_kids(NodeType::File, &kids);
        self.symtab.install(root)?;
        Ok((self.symtab, root))
    }

    fn read(&mut self) -> Result<u64> {
        self.reader.read()
    }

    fn read_name(&mut self) -> Result<String> {
        let len = self.read()?;
        let mut name = String::new();
        for _ in 0..len {
            name.push(self.read()? as u8 as char);
        }
        Ok(name)
    }

    fn pop_kids(&mut self, ty: NodeType, count: usize) -> Result<Vec<NodeId>> {
        let floor = self.section_start.unwrap_or(0);
        if self.stack.len() < floor + count {
            return Err(CasmError::ArityUnderflow {
                name: ty.name(),
                wanted: count,
                have: self.stack.len() - floor,
            });
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn enter_section(&mut self) -> Result<()> {
        if self.section_start.is_some() {
            return Err(CasmError::internal("nested section blocks"));
        }
        self.section_symtab.clear();
        let count = self.read()?;
        for _ in 0..count {
            let name = self.read_name()?;
            let sym = self.symtab.get_or_create_symbol(&name);
            self.section_symtab.add(sym);
        }
        self.section_start = Some(self.stack.len());
        Ok(())
    }

    fn finish_section(&mut self) -> Result<()> {
        let Some(start) = self.section_start.take() else {
            return Err(CasmError::internal("section opcode outside block"));
        };
        let kids = self.stack.split_off(start);
        let section = self.symtab.create_with_kids(NodeType::Section, &kids);
        match self.reader.next_event() {
            Some(IntEvent::BlockExit) => {}
            other => {
                return Err(CasmError::internal(format!(
                    "expected section block exit, found {other:?}"
                )));
            }
        }
        self.section_symtab.clear();
        self.stack.push(section);
        Ok(())
    }

    fn dispatch(&mut self, opcode: u64) -> Result<()> {
        let ty = NodeType::from_opcode(opcode)
            .ok_or(CasmError::NoSuchNodeType { opcode })?;
        if ty.is_int_node() {
            let code = self.read()?;
            let node = if code == 0 {
                let format = ty.natural_format().unwrap_or(IntFormat::Varuint64);
                self.symtab.create_int_with_format(ty, 0, format)
            } else {
                let format = IntFormat::from_code((code - 1) as u8)
                    .ok_or(CasmError::NoSuchNodeType { opcode: code })?;
                let value = self.read()?;
                self.symtab.create_int_with_format(ty, value, format)
            };
            self.stack.push(node);
            return Ok(());
        }
        match ty {
            NodeType::Section => self.finish_section()?,
            NodeType::Symbol => {
                let sym = match self.read()? {
                    SYMBOL_PREDEFINED => {
                        let code = self.read()?;
                        let predefined = PredefinedSymbol::from_code(code)
                            .ok_or(CasmError::NoSuchNodeType { opcode: code })?;
                        self.symtab.predefined(predefined)
                    }
                    SYMBOL_INDEXED => {
                        let index = self.read()?;
                        self.section_symtab.lookup(index).ok_or(
                            CasmError::BadSymbolIndex {
                                index,
                                len: self.section_symtab.len(),
                            },
                        )?
                    }
                    SYMBOL_NAMED => {
                        let name = self.read_name()?;
                        self.symtab.get_or_create_symbol(&name)
                    }
                    other => {
                        return Err(CasmError::internal(format!(
                            "bad symbol reference tag {other}"
                        )));
                    }
                };
                self.stack.push(sym);
            }
            NodeType::Stream => {
                let encoding = self.read()?;
                let kind = if encoding / 4 == 0 {
                    StreamKind::Input
                } else {
                    StreamKind::Output
                };
                let stream_ty = StreamType::from_code((encoding % 4) as u8)
                    .ok_or(CasmError::NoSuchNodeType { opcode: encoding })?;
                let node = self.symtab.create_stream(kind, stream_ty);
                self.stack.push(node);
            }
            NodeType::FileHeader | NodeType::ReadHeader | NodeType::WriteHeader => {
                let count = self.read()?;
                let mut kids = Vec::new();
                for _ in 0..count {
                    let stream = self.reader.stream_handle();
                    let pair = stream.borrow().header().get(self.header_index).copied();
                    let Some((value, format)) = pair else {
                        return Err(CasmError::HeaderMismatch {
                            expected: "header pair".to_owned(),
                            actual: "end of header".to_owned(),
                        });
                    };
                    self.header_index += 1;
                    let literal = NodeType::literal_for_format(format);
                    kids.push(self.symtab.create_int_with_format(literal, value, format));
                }
                let node = self.symtab.create_with_kids(ty, &kids);
                self.stack.push(node);
            }
            NodeType::File | NodeType::UnknownSection => {
                return Err(CasmError::NoSuchNodeType { opcode });
            }
            _ => match ty.arity() {
                Arity::Fixed(count) => {
                    let kids = self.pop_kids(ty, count)?;
                    let node = self.symtab.create_with_kids(ty, &kids);
                    self.stack.push(node);
                }
                Arity::Variable => {
                    let count = usize::try_from(self.read()?)
                        .map_err(|_| CasmError::internal("absurd child count"))?;
                    let kids = self.pop_kids(ty, count)?;
                    let node = self.symtab.create_with_kids(ty, &kids);
                    self.stack.push(node);
                }
                Arity::Special => return Err(CasmError::NoSuchNodeType { opcode }),
            },
        }
        Ok(())
    }
}
