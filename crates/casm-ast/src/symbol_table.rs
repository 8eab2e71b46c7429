//! The arena of filter AST nodes and the symbol name space.
//!
//! All nodes of a filter program live in one owning vector inside the
//! [`SymbolTable`]; handles are [`NodeId`] indices, so child lists and
//! parent references never carry ownership. Symbols are ordinary nodes with
//! a name payload, looked up through a name map with upsert semantics. An
//! installed root algorithm anchors the table.

use std::collections::HashMap;

use casm_error::{CasmError, Result};
use casm_types::{IntFormat, IntValue, StreamKind, StreamType};

use crate::node::{Node, NodeId, Payload, PredefinedSymbol};
use crate::node_type::NodeType;

/// A process-local arena of filter AST nodes plus the symbol name space.
#[derive(Debug, Default)]
pub struct SymbolTable {
    nodes: Vec<Node>,
    symbols: HashMap<String, NodeId>,
    predefined: [Option<NodeId>; PredefinedSymbol::ALL.len()],
    root: Option<NodeId>,
}

impl SymbolTable {
    /// New empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("arena overflow"));
        self.nodes.push(node);
        id
    }

    /// Borrow a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Number of nodes allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tag of a node.
    #[must_use]
    pub fn ty(&self, id: NodeId) -> NodeType {
        self.node(id).ty
    }

    // -- construction -------------------------------------------------------

    /// Create a payload-free node.
    pub fn create(&mut self, ty: NodeType) -> NodeId {
        debug_assert!(!ty.is_int_node(), "{} needs an integer payload", ty.name());
        self.alloc(Node::new(ty, Payload::None))
    }

    /// Create a payload-free node with children.
    pub fn create_with_kids(&mut self, ty: NodeType, kids: &[NodeId]) -> NodeId {
        let id = self.create(ty);
        self.nodes[id.index()].kids.extend_from_slice(kids);
        id
    }

    /// Create an integer-carrying node with an explicit format.
    pub fn create_int_with_format(
        &mut self,
        ty: NodeType,
        value: IntValue,
        format: IntFormat,
    ) -> NodeId {
        debug_assert!(ty.is_int_node(), "{} carries no integer", ty.name());
        self.alloc(Node::new(ty, Payload::Int { value, format }))
    }

    /// Create an integer-carrying node in the tag's natural format (or
    /// varuint64 for the non-literal integer tags).
    pub fn create_int(&mut self, ty: NodeType, value: IntValue) -> NodeId {
        let format = ty.natural_format().unwrap_or(IntFormat::Varuint64);
        self.create_int_with_format(ty, value, format)
    }

    /// Create a stream-check node.
    pub fn create_stream(&mut self, kind: StreamKind, stream_ty: StreamType) -> NodeId {
        self.alloc(Node::new(
            NodeType::Stream,
            Payload::Stream { kind, ty: stream_ty },
        ))
    }

    /// Append a child to `parent`.
    pub fn append_kid(&mut self, parent: NodeId, kid: NodeId) {
        self.nodes[parent.index()].kids.push(kid);
    }

    // -- symbols ------------------------------------------------------------

    /// Look up a symbol by name.
    #[must_use]
    pub fn get_symbol(&self, name: &str) -> Option<NodeId> {
        self.symbols.get(name).copied()
    }

    /// Look up a symbol by name, creating it if absent (upsert).
    pub fn get_or_create_symbol(&mut self, name: &str) -> NodeId {
        if let Some(id) = self.symbols.get(name) {
            return *id;
        }
        let id = self.alloc(Node::new(
            NodeType::Symbol,
            Payload::Symbol {
                name: name.to_owned(),
                define: None,
                predefined: None,
            },
        ));
        self.symbols.insert(name.to_owned(), id);
        id
    }

    /// The symbol node for a predefined symbol, created on first use.
    pub fn predefined(&mut self, sym: PredefinedSymbol) -> NodeId {
        if let Some(id) = self.predefined[sym.code() as usize] {
            return id;
        }
        let id = self.get_or_create_symbol(sym.name());
        if let Payload::Symbol { predefined, .. } = &mut self.nodes[id.index()].payload {
            *predefined = Some(sym);
        }
        self.predefined[sym.code() as usize] = Some(id);
        id
    }

    /// Name of a symbol node.
    #[must_use]
    pub fn symbol_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).payload {
            Payload::Symbol { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Predefined tag of a symbol node, if any.
    #[must_use]
    pub fn symbol_predefined(&self, id: NodeId) -> Option<PredefinedSymbol> {
        match &self.node(id).payload {
            Payload::Symbol { predefined, .. } => *predefined,
            _ => None,
        }
    }

    /// The define body bound to a symbol node.
    #[must_use]
    pub fn symbol_define(&self, id: NodeId) -> Option<NodeId> {
        match &self.node(id).payload {
            Payload::Symbol { define, .. } => *define,
            _ => None,
        }
    }

    /// Bind a define node to a symbol.
    pub fn set_symbol_define(&mut self, sym: NodeId, define: Option<NodeId>) {
        if let Payload::Symbol { define: slot, .. } = &mut self.nodes[sym.index()].payload {
            *slot = define;
        }
    }

    // -- installation -------------------------------------------------------

    /// The installed root algorithm, if any.
    #[must_use]
    pub fn installed_root(&self) -> Option<NodeId> {
        self.root
    }

    /// Install `root` as the table's algorithm: bind every `Define` to its
    /// symbol, apply `Rename`/`Undefine`, and tag each `Param` with its
    /// defining symbol so parameter references can resolve at eval time.
    pub fn install(&mut self, root: NodeId) -> Result<()> {
        self.root = Some(root);
        let top_kids = self.node(root).kids.clone();
        for kid in top_kids {
            match self.ty(kid) {
                NodeType::Define => {
                    let sym = self.node(kid).kid(0).ok_or_else(|| {
                        CasmError::internal("define without symbol")
                    })?;
                    self.set_symbol_define(sym, Some(kid));
                    self.tag_params(kid, sym);
                }
                NodeType::Rename => {
                    let from = self.node(kid).kid(0);
                    let to = self.node(kid).kid(1);
                    if let (Some(from), Some(to)) = (from, to) {
                        let body = self.symbol_define(from);
                        self.set_symbol_define(to, body);
                    }
                }
                NodeType::Undefine => {
                    if let Some(sym) = self.node(kid).kid(0) {
                        self.set_symbol_define(sym, None);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn tag_params(&mut self, node: NodeId, sym: NodeId) {
        if self.ty(node) == NodeType::Param {
            self.nodes[node.index()].defining_sym = Some(sym);
        }
        let kids = self.node(node).kids.clone();
        for kid in kids {
            // A nested define rebinds its own parameters.
            if self.ty(kid) == NodeType::Define {
                continue;
            }
            self.tag_params(kid, sym);
        }
    }

    /// The defining symbol of a `Param` node, set at install time.
    #[must_use]
    pub fn param_defining_sym(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).defining_sym
    }

    /// Declared parameter count of a define node.
    pub fn define_param_count(&self, define: NodeId) -> Result<u64> {
        let decl = self
            .node(define)
            .kid(1)
            .ok_or_else(|| CasmError::internal("define without parameter declaration"))?;
        match self.ty(decl) {
            NodeType::NoParams => Ok(0),
            NodeType::ParamValues => Ok(self.node(decl).value().unwrap_or(0)),
            other => Err(CasmError::internal(format!(
                "bad parameter declaration: {}",
                other.name()
            ))),
        }
    }

    /// Body of a define node (everything after symbol/params/locals).
    #[must_use]
    pub fn define_body(&self, define: NodeId) -> Option<NodeId> {
        self.node(define).kid(3)
    }

    /// Resolve a case list (children of a `Switch`, `Map`, or `Opcode`
    /// starting at `first_case`) against a selector value.
    #[must_use]
    pub fn find_case(&self, node: NodeId, first_case: usize, selector: IntValue) -> Option<NodeId> {
        for &kid in &self.node(node).kids[first_case..] {
            if self.ty(kid) != NodeType::Case {
                continue;
            }
            let Some(value_node) = self.node(kid).kid(0) else {
                continue;
            };
            if self.node(value_node).value() == Some(selector) {
                return Some(kid);
            }
        }
        None
    }
}

/// The subordinate, per-section symbol index.
///
/// Assigns each symbol referenced inside a section a dense small integer so
/// `Symbol` nodes flatten as indices. Cleared at section exit.
#[derive(Debug, Default)]
pub struct SectionSymbolTable {
    indices: HashMap<NodeId, u32>,
    vector: Vec<NodeId>,
}

impl SectionSymbolTable {
    /// New empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vector.len()
    }

    /// Whether no symbols are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Symbols in index order.
    #[must_use]
    pub fn vector(&self) -> &[NodeId] {
        &self.vector
    }

    /// Index every symbol referenced inside `section`, in first-visit
    /// preorder.
    pub fn install_section(&mut self, symtab: &SymbolTable, section: NodeId) {
        self.collect(symtab, section);
    }

    fn collect(&mut self, symtab: &SymbolTable, node: NodeId) {
        if symtab.ty(node) == NodeType::Symbol {
            self.add(node);
        }
        for &kid in symtab.node(node).kids() {
            self.collect(symtab, kid);
        }
    }

    /// Add a symbol, keeping the first-assigned index (upsert).
    pub fn add(&mut self, sym: NodeId) -> u32 {
        if let Some(&index) = self.indices.get(&sym) {
            return index;
        }
        let index = u32::try_from(self.vector.len()).expect("section symbol overflow");
        self.indices.insert(sym, index);
        self.vector.push(sym);
        index
    }

    /// Dense index of a symbol.
    #[must_use]
    pub fn get_index(&self, sym: NodeId) -> Option<u32> {
        self.indices.get(&sym).copied()
    }

    /// Symbol at a dense index.
    #[must_use]
    pub fn lookup(&self, index: u64) -> Option<NodeId> {
        usize::try_from(index).ok().and_then(|i| self.vector.get(i).copied())
    }

    /// Drop all indexed symbols (section exit).
    pub fn clear(&mut self) {
        self.indices.clear();
        self.vector.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_upsert() {
        let mut symtab = SymbolTable::new();
        let a = symtab.get_or_create_symbol("memory");
        let b = symtab.get_or_create_symbol("memory");
        assert_eq!(a, b);
        assert_eq!(symtab.symbol_name(a), Some("memory"));
        assert_ne!(symtab.get_or_create_symbol("code"), a);
    }

    #[test]
    fn predefined_symbols_are_stable() {
        let mut symtab = SymbolTable::new();
        let enter = symtab.predefined(PredefinedSymbol::BlockEnter);
        assert_eq!(symtab.predefined(PredefinedSymbol::BlockEnter), enter);
        assert_eq!(
            symtab.symbol_predefined(enter),
            Some(PredefinedSymbol::BlockEnter)
        );
        assert_eq!(symtab.symbol_name(enter), Some("block.enter"));
    }

    #[test]
    fn install_binds_defines_and_params() {
        let mut symtab = SymbolTable::new();
        let sym = symtab.get_or_create_symbol("copy");
        let params = symtab.create_int(NodeType::ParamValues, 1);
        let locals = symtab.create(NodeType::NoLocals);
        let body = symtab.create_int(NodeType::Param, 0);
        let define = symtab.create_with_kids(NodeType::Define, &[sym, params, locals, body]);
        let file = symtab.create_with_kids(NodeType::File, &[define]);
        symtab.install(file).unwrap();

        assert_eq!(symtab.symbol_define(sym), Some(define));
        assert_eq!(symtab.define_param_count(define).unwrap(), 1);
        assert_eq!(symtab.param_defining_sym(body), Some(sym));
        assert_eq!(symtab.installed_root(), Some(file));
    }

    #[test]
    fn rename_and_undefine() {
        let mut symtab = SymbolTable::new();
        let old = symtab.get_or_create_symbol("opcode");
        let saved = symtab.get_or_create_symbol("opcode.old");
        let gone = symtab.get_or_create_symbol("drop.me");
        let params = symtab.create(NodeType::NoParams);
        let locals = symtab.create(NodeType::NoLocals);
        let body = symtab.create(NodeType::Void);
        let define = symtab.create_with_kids(NodeType::Define, &[old, params, locals, body]);
        let gone_define = {
            let p = symtab.create(NodeType::NoParams);
            let l = symtab.create(NodeType::NoLocals);
            let b = symtab.create(NodeType::Void);
            symtab.create_with_kids(NodeType::Define, &[gone, p, l, b])
        };
        let rename = symtab.create_with_kids(NodeType::Rename, &[old, saved]);
        let undefine = symtab.create_with_kids(NodeType::Undefine, &[gone]);
        let file =
            symtab.create_with_kids(NodeType::File, &[define, gone_define, rename, undefine]);
        symtab.install(file).unwrap();

        assert_eq!(symtab.symbol_define(saved), Some(define));
        assert_eq!(symtab.symbol_define(gone), None);
    }

    #[test]
    fn section_symbol_indices_are_dense() {
        let mut symtab = SymbolTable::new();
        let a = symtab.get_or_create_symbol("a");
        let b = symtab.get_or_create_symbol("b");
        let use_a1 = a;
        let section = symtab.create_with_kids(NodeType::Section, &[use_a1, b, a]);

        let mut sect = SectionSymbolTable::new();
        sect.install_section(&symtab, section);
        assert_eq!(sect.len(), 2);
        assert_eq!(sect.get_index(a), Some(0));
        assert_eq!(sect.get_index(b), Some(1));
        assert_eq!(sect.lookup(1), Some(b));
        sect.clear();
        assert!(sect.is_empty());
    }

    #[test]
    fn default_value_predicate() {
        let mut symtab = SymbolTable::new();
        let zero = symtab.create_int(NodeType::U32Const, 0);
        let five = symtab.create_int(NodeType::U32Const, 5);
        assert!(symtab.node(zero).is_default_value());
        assert!(!symtab.node(five).is_default_value());
    }

    #[test]
    fn defines_int_type_format() {
        let mut symtab = SymbolTable::new();
        let good = symtab.create_int(NodeType::U32Const, 0x6d73_6163);
        let bad_format =
            symtab.create_int_with_format(NodeType::U8Const, 1, IntFormat::Varuint64);
        let bad_range = symtab.create_int_with_format(NodeType::U8Const, 300, IntFormat::Uint8);
        assert!(symtab.node(good).defines_int_type_format());
        assert!(!symtab.node(bad_format).defines_int_type_format());
        assert!(!symtab.node(bad_range).defines_int_type_format());
    }
}
