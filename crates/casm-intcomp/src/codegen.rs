//! Generates the filter AST that decodes an abbreviation stream.
//!
//! The produced algorithm is `File(headers…, defines…)` where the main
//! define is `LoopUnbounded(Switch(read-abbrev, Error, case*))`, one case
//! per assigned abbreviation. Under the CISM model the decoder is instead
//! expressed as overrides of the host algorithm's `opcode` and
//! `categorize` functions.

use casm_ast::{NodeId, NodeType, PredefinedSymbol, SymbolTable};
use casm_error::{CasmError, Result};
use casm_types::{
    IntFormat, IntValue, CASM_BINARY_MAGIC, CASM_BINARY_VERSION, CISM_BINARY_MAGIC,
    CISM_BINARY_VERSION, WASM_BINARY_MAGIC, WASM_BINARY_VERSION,
};

use crate::count_node::{CountKind, CountNodeId, CountTrie};
use crate::flags::CompressionFlags;
use crate::huffman::{HuffmanNode, HuffmanTree};

/// CISM category tag for a single-default abbreviation.
const CISM_DEFAULT_SINGLE_VALUE: u32 = 16767;
/// CISM category tag for a multi-default abbreviation.
const CISM_DEFAULT_MULTIPLE_VALUE: u32 = 16764;
/// CISM category tag for a block-enter abbreviation.
const CISM_BLOCK_ENTER_VALUE: u32 = 16768;
/// CISM category tag for a block-exit abbreviation.
const CISM_BLOCK_EXIT_VALUE: u32 = 16769;
/// CISM category tag for an align abbreviation.
const CISM_ALIGN_VALUE: u32 = 16770;

const CATEGORIZE_NAME: &str = "categorize";
const OPCODE_NAME: &str = "opcode";
const OLD_SUFFIX: &str = ".old";

/// Builds the decoder (or encoder) AST for an abbreviation assignment.
pub struct AbbreviationCodegen<'a> {
    flags: &'a CompressionFlags,
    trie: &'a CountTrie,
    encoding_root: Option<&'a HuffmanTree>,
    assignments: &'a [CountNodeId],
    to_read: bool,
}

impl<'a> AbbreviationCodegen<'a> {
    /// New generator over a completed assignment pass.
    pub fn new(
        flags: &'a CompressionFlags,
        trie: &'a CountTrie,
        encoding_root: Option<&'a HuffmanTree>,
        assignments: &'a [CountNodeId],
        to_read: bool,
    ) -> Self {
        Self {
            flags,
            trie,
            encoding_root,
            assignments,
            to_read,
        }
    }

    /// Generate the algorithm and install it in a fresh symbol table.
    pub fn generate(&self) -> Result<(SymbolTable, NodeId)> {
        let mut symtab = SymbolTable::new();
        let mut kids = Vec::new();
        kids.push(self.generate_header(
            &mut symtab,
            NodeType::FileHeader,
            CASM_BINARY_MAGIC,
            CASM_BINARY_VERSION,
        ));
        if self.flags.use_cism_model {
            if self.to_read {
                kids.push(self.generate_header(
                    &mut symtab,
                    NodeType::ReadHeader,
                    CISM_BINARY_MAGIC,
                    CISM_BINARY_VERSION,
                ));
                kids.push(self.generate_header(
                    &mut symtab,
                    NodeType::WriteHeader,
                    WASM_BINARY_MAGIC,
                    WASM_BINARY_VERSION,
                ));
            } else {
                kids.push(self.generate_header(
                    &mut symtab,
                    NodeType::ReadHeader,
                    WASM_BINARY_MAGIC,
                    WASM_BINARY_VERSION,
                ));
                kids.push(self.generate_header(
                    &mut symtab,
                    NodeType::WriteHeader,
                    CISM_BINARY_MAGIC,
                    CISM_BINARY_VERSION,
                ));
            }
        } else {
            kids.push(self.generate_header(
                &mut symtab,
                NodeType::ReadHeader,
                WASM_BINARY_MAGIC,
                WASM_BINARY_VERSION,
            ));
        }
        self.generate_functions(&mut symtab, &mut kids)?;
        let root = symtab.create_with_kids(NodeType::File, &kids);
        symtab.install(root)?;
        Ok((symtab, root))
    }

    fn generate_header(
        &self,
        symtab: &mut SymbolTable,
        ty: NodeType,
        magic: u32,
        version: u32,
    ) -> NodeId {
        let magic = symtab.create_int(NodeType::U32Const, IntValue::from(magic));
        let version = symtab.create_int(NodeType::U32Const, IntValue::from(version));
        symtab.create_with_kids(ty, &[magic, version])
    }

    fn generate_functions(&self, symtab: &mut SymbolTable, kids: &mut Vec<NodeId>) -> Result<()> {
        if !self.flags.use_cism_model {
            kids.push(self.generate_start_function(symtab)?);
            return Ok(());
        }
        kids.push(self.generate_enclosing_alg(symtab, "cism"));
        kids.push(self.generate_rename(symtab, CATEGORIZE_NAME));
        kids.push(self.generate_rename(symtab, OPCODE_NAME));
        kids.push(self.generate_opcode_function(symtab)?);
        kids.push(self.generate_categorize_function(symtab)?);
        Ok(())
    }

    fn generate_enclosing_alg(&self, symtab: &mut SymbolTable, name: &str) -> NodeId {
        let sym = symtab.get_or_create_symbol(name);
        symtab.create_with_kids(NodeType::EnclosingAlgorithms, &[sym])
    }

    fn generate_rename(&self, symtab: &mut SymbolTable, name: &str) -> NodeId {
        let from = symtab.get_or_create_symbol(name);
        let to = symtab.get_or_create_symbol(&format!("{name}{OLD_SUFFIX}"));
        symtab.create_with_kids(NodeType::Rename, &[from, to])
    }

    fn generate_start_function(&self, symtab: &mut SymbolTable) -> Result<NodeId> {
        let sym = symtab.predefined(PredefinedSymbol::File);
        let params = symtab.create(NodeType::NoParams);
        let locals = symtab.create(NodeType::NoLocals);
        let switch = self.generate_switch_statement(symtab)?;
        let body = symtab.create_with_kids(NodeType::LoopUnbounded, &[switch]);
        Ok(symtab.create_with_kids(NodeType::Define, &[sym, params, locals, body]))
    }

    fn generate_opcode_function(&self, symtab: &mut SymbolTable) -> Result<NodeId> {
        let sym = symtab.get_or_create_symbol(OPCODE_NAME);
        let params = symtab.create(NodeType::NoParams);
        let locals = symtab.create(NodeType::NoLocals);
        let body = self.generate_abbreviation_read(symtab);
        Ok(symtab.create_with_kids(NodeType::Define, &[sym, params, locals, body]))
    }

    fn generate_categorize_function(&self, symtab: &mut SymbolTable) -> Result<NodeId> {
        let sym = symtab.get_or_create_symbol(CATEGORIZE_NAME);
        let params = symtab.create_int(NodeType::ParamValues, 1);
        let locals = symtab.create(NodeType::NoLocals);
        let selector = symtab.create_int(NodeType::Param, 0);
        let mut map_kids = vec![selector];
        for &id in self.assignments {
            let node = self.trie.node(id);
            let tag = match node.kind() {
                CountKind::DefaultSingle => CISM_DEFAULT_SINGLE_VALUE,
                CountKind::DefaultMultiple => CISM_DEFAULT_MULTIPLE_VALUE,
                CountKind::BlockEnter => CISM_BLOCK_ENTER_VALUE,
                CountKind::BlockExit => CISM_BLOCK_EXIT_VALUE,
                CountKind::Align => CISM_ALIGN_VALUE,
                CountKind::Int | CountKind::Root => continue,
            };
            let index = node.abbrev().ok_or(CasmError::MissingAbbrevIndex)?;
            let case_value = symtab.create_int(NodeType::U64Const, index.as_value());
            let mapped = symtab.create_int(NodeType::U32Const, IntValue::from(tag));
            map_kids.push(symtab.create_with_kids(NodeType::Case, &[case_value, mapped]));
        }
        let map = symtab.create_with_kids(NodeType::Map, &map_kids);
        Ok(symtab.create_with_kids(NodeType::Define, &[sym, params, locals, map]))
    }

    fn generate_abbreviation_read(&self, symtab: &mut SymbolTable) -> NodeId {
        let mut format = match self.encoding_root {
            Some(tree) => {
                let encoding = self.generate_huffman_encoding(symtab, tree, tree.root());
                symtab.create_with_kids(NodeType::BinaryEval, &[encoding])
            }
            None => self.generate_abbrev_format(symtab),
        };
        if self.to_read {
            format = symtab.create_with_kids(NodeType::Read, &[format]);
        }
        format
    }

    fn generate_huffman_encoding(
        &self,
        symtab: &mut SymbolTable,
        tree: &HuffmanTree,
        id: usize,
    ) -> NodeId {
        match *tree.node(id) {
            HuffmanNode::Selector { zero, one, .. } => {
                let zero = self.generate_huffman_encoding(symtab, tree, zero);
                let one = self.generate_huffman_encoding(symtab, tree, one);
                symtab.create_with_kids(NodeType::BinarySelect, &[zero, one])
            }
            HuffmanNode::Symbol { index, .. } => {
                symtab.create_int(NodeType::BinaryAccept, index.as_value())
            }
        }
    }

    fn generate_abbrev_format(&self, symtab: &mut SymbolTable) -> NodeId {
        let ty = match self.flags.abbrev_format {
            IntFormat::Uint8 => NodeType::Uint8NoArgs,
            IntFormat::Uint32 => NodeType::Uint32NoArgs,
            IntFormat::Uint64 => NodeType::Uint64NoArgs,
            IntFormat::Varint32 => NodeType::Varint32NoArgs,
            IntFormat::Varint64 => NodeType::Varint64NoArgs,
            IntFormat::Varuint32 => NodeType::Varuint32NoArgs,
            IntFormat::Varuint64 => NodeType::Varuint64NoArgs,
        };
        symtab.create(ty)
    }

    fn generate_switch_statement(&self, symtab: &mut SymbolTable) -> Result<NodeId> {
        let selector = self.generate_abbreviation_read(symtab);
        let default = symtab.create(NodeType::Error);
        let mut kids = vec![selector, default];
        for &id in self.assignments {
            let index = self
                .trie
                .node(id)
                .abbrev()
                .ok_or(CasmError::MissingAbbrevIndex)?;
            let case_value = symtab.create_int(NodeType::U64Const, index.as_value());
            let action = self.generate_action(symtab, id);
            kids.push(symtab.create_with_kids(NodeType::Case, &[case_value, action]));
        }
        Ok(symtab.create_with_kids(NodeType::Switch, &kids))
    }

    fn generate_action(&self, symtab: &mut SymbolTable, id: CountNodeId) -> NodeId {
        match self.trie.node(id).kind() {
            CountKind::Int => self.generate_int_lit_action(symtab, id),
            CountKind::BlockEnter => {
                let sym = if self.to_read {
                    PredefinedSymbol::BlockEnter
                } else {
                    PredefinedSymbol::BlockEnterWriteonly
                };
                self.generate_callback(symtab, sym)
            }
            CountKind::BlockExit => {
                let sym = if self.to_read {
                    PredefinedSymbol::BlockExit
                } else {
                    PredefinedSymbol::BlockExitWriteonly
                };
                self.generate_callback(symtab, sym)
            }
            CountKind::DefaultSingle => self.generate_default_single_action(symtab),
            CountKind::DefaultMultiple => self.generate_default_multiple_action(symtab),
            CountKind::Align => self.generate_callback(symtab, PredefinedSymbol::Align),
            CountKind::Root => symtab.create(NodeType::Error),
        }
    }

    fn generate_callback(&self, symtab: &mut SymbolTable, sym: PredefinedSymbol) -> NodeId {
        let sym = symtab.predefined(sym);
        let use_node = symtab.create_with_kids(NodeType::LiteralUse, &[sym]);
        symtab.create_with_kids(NodeType::Callback, &[use_node])
    }

    fn generate_default_single_action(&self, symtab: &mut SymbolTable) -> NodeId {
        symtab.create(NodeType::Varint64NoArgs)
    }

    fn generate_default_multiple_action(&self, symtab: &mut SymbolTable) -> NodeId {
        let mut loop_size = symtab.create(NodeType::Varuint64NoArgs);
        if self.to_read {
            loop_size = symtab.create_with_kids(NodeType::Read, &[loop_size]);
        }
        let body = self.generate_default_single_action(symtab);
        symtab.create_with_kids(NodeType::Loop, &[loop_size, body])
    }

    /// On the read side an integer abbreviation expands to its path of
    /// literals; on the write side the matched run has already been
    /// consumed, so nothing is emitted.
    fn generate_int_lit_action(&self, symtab: &mut SymbolTable, id: CountNodeId) -> NodeId {
        if !self.to_read {
            return symtab.create(NodeType::Void);
        }
        let format = symtab.create(NodeType::Varuint64NoArgs);
        let mut kids = vec![format];
        for value in self.trie.path(id) {
            kids.push(symtab.create_int(NodeType::U64Const, value));
        }
        symtab.create_with_kids(NodeType::Write, &kids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::{assign_abbreviations, CutoffParams, SYNTHETIC_ASSIGNMENTS};
    use casm_types::AbbrevIndex;

    fn assigned_trie() -> (CountTrie, Vec<CountNodeId>) {
        let mut trie = CountTrie::new();
        let root = trie.root();
        let a = trie.get_or_create_child(root, 10);
        let b = trie.get_or_create_child(a, 20);
        for _ in 0..4 {
            trie.increment(a);
            trie.increment(b);
        }
        let assignments = assign_abbreviations(
            &mut trie,
            &CutoffParams {
                count_cutoff: 2,
                weight_cutoff: 2,
                max_abbreviations: 64,
            },
        );
        (trie, assignments)
    }

    #[test]
    fn plain_model_generates_file_define() {
        let flags = CompressionFlags::default();
        let (trie, assignments) = assigned_trie();
        let codegen = AbbreviationCodegen::new(&flags, &trie, None, &assignments, true);
        let (symtab, root) = codegen.generate().unwrap();

        assert_eq!(symtab.ty(root), NodeType::File);
        let file_sym = symtab.get_symbol("file").unwrap();
        let define = symtab.symbol_define(file_sym).unwrap();
        let body = symtab.define_body(define).unwrap();
        assert_eq!(symtab.ty(body), NodeType::LoopUnbounded);
        let switch = symtab.node(body).kid(0).unwrap();
        assert_eq!(symtab.ty(switch), NodeType::Switch);
        // Selector + default + one case per assignment.
        assert_eq!(symtab.node(switch).num_kids(), 2 + assignments.len());
    }

    #[test]
    fn header_pairs_carry_casm_magic() {
        let flags = CompressionFlags::default();
        let (trie, assignments) = assigned_trie();
        let codegen = AbbreviationCodegen::new(&flags, &trie, None, &assignments, true);
        let (symtab, root) = codegen.generate().unwrap();
        let header = symtab.node(root).kid(0).unwrap();
        assert_eq!(symtab.ty(header), NodeType::FileHeader);
        let magic = symtab.node(header).kid(0).unwrap();
        assert_eq!(
            symtab.node(magic).value(),
            Some(IntValue::from(CASM_BINARY_MAGIC))
        );
        assert!(symtab.node(magic).defines_int_type_format());
    }

    #[test]
    fn int_action_expands_path_in_order() {
        let flags = CompressionFlags::default();
        let (trie, assignments) = assigned_trie();
        let pair = assignments[SYNTHETIC_ASSIGNMENTS];
        let codegen = AbbreviationCodegen::new(&flags, &trie, None, &assignments, true);
        let mut symtab = SymbolTable::new();
        let action = codegen.generate_int_lit_action(&mut symtab, pair);
        assert_eq!(symtab.ty(action), NodeType::Write);
        let kids = symtab.node(action).kids().to_vec();
        assert_eq!(kids.len(), 3);
        assert_eq!(symtab.node(kids[1]).value(), Some(10));
        assert_eq!(symtab.node(kids[2]).value(), Some(20));
    }

    #[test]
    fn cism_model_renames_and_categorizes() {
        let flags = CompressionFlags {
            use_cism_model: true,
            ..CompressionFlags::default()
        };
        let (trie, assignments) = assigned_trie();
        let codegen = AbbreviationCodegen::new(&flags, &trie, None, &assignments, true);
        let (symtab, root) = codegen.generate().unwrap();

        let kinds: Vec<NodeType> = symtab
            .node(root)
            .kids()
            .iter()
            .map(|&kid| symtab.ty(kid))
            .collect();
        assert!(kinds.contains(&NodeType::EnclosingAlgorithms));
        assert_eq!(
            kinds.iter().filter(|&&t| t == NodeType::Rename).count(),
            2
        );

        let categorize = symtab.get_symbol("categorize").unwrap();
        let define = symtab.symbol_define(categorize).unwrap();
        let map = symtab.define_body(define).unwrap();
        assert_eq!(symtab.ty(map), NodeType::Map);
        // Five synthetic categories, each mapped to its CISM tag.
        assert_eq!(symtab.node(map).num_kids(), 1 + SYNTHETIC_ASSIGNMENTS);
        let first_case = symtab.node(map).kid(1).unwrap();
        let mapped = symtab.node(first_case).kid(1).unwrap();
        assert_eq!(
            symtab.node(mapped).value(),
            Some(IntValue::from(CISM_DEFAULT_SINGLE_VALUE))
        );
    }

    #[test]
    fn huffman_selector_wraps_in_binary_eval() {
        let flags = CompressionFlags {
            use_huffman: true,
            ..CompressionFlags::default()
        };
        let (trie, assignments) = assigned_trie();
        let weights: Vec<(AbbrevIndex, u64)> = assignments
            .iter()
            .map(|&id| (trie.node(id).abbrev().unwrap(), trie.node(id).count().max(1)))
            .collect();
        let tree = HuffmanTree::build(&weights).unwrap();
        let codegen =
            AbbreviationCodegen::new(&flags, &trie, Some(&tree), &assignments, true);
        let (symtab, _root) = codegen.generate().unwrap();

        let file_sym = symtab.get_symbol("file").unwrap();
        let define = symtab.symbol_define(file_sym).unwrap();
        let body = symtab.define_body(define).unwrap();
        let switch = symtab.node(body).kid(0).unwrap();
        let selector = symtab.node(switch).kid(0).unwrap();
        assert_eq!(symtab.ty(selector), NodeType::Read);
        let eval = symtab.node(selector).kid(0).unwrap();
        assert_eq!(symtab.ty(eval), NodeType::BinaryEval);
    }
}
