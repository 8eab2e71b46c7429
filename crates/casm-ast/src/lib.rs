//! Filter AST for the CASM compressor.
//!
//! A filter program is a tree of uniformly tagged nodes drawn from the
//! closed table in [`node_type`]. Nodes live in an arena owned by a
//! [`SymbolTable`]; symbols are nodes with a name payload and optional
//! define bodies, plus a closed set of predefined symbols. The
//! [`Flattener`] serializes an installed AST into the CASM integer opcode
//! stream and [`unflatten`] reads one back.

mod flatten;
mod node;
mod node_type;
mod symbol_table;
mod text;
mod unflatten;

pub use flatten::Flattener;
pub use node::{Node, NodeId, Payload, PredefinedSymbol};
pub use node_type::{Arity, NodeType, NodeTypeInfo, NODE_TYPE_TABLE};
pub use symbol_table::{SectionSymbolTable, SymbolTable};
pub use text::abbrev_text;
pub use unflatten::unflatten;

/// Structural equivalence of two nodes, possibly across tables.
///
/// Symbols match by name, integer payloads by value and format, and
/// children recursively; define bindings are not compared (they are derived
/// from the tree at install time).
#[must_use]
pub fn structurally_equal(
    a_tab: &SymbolTable,
    a: NodeId,
    b_tab: &SymbolTable,
    b: NodeId,
) -> bool {
    let a_node = a_tab.node(a);
    let b_node = b_tab.node(b);
    if a_node.ty() != b_node.ty() || a_node.num_kids() != b_node.num_kids() {
        return false;
    }
    let payload_match = match (a_node.payload(), b_node.payload()) {
        (Payload::None, Payload::None) => true,
        (
            Payload::Int { value: av, format: af },
            Payload::Int { value: bv, format: bf },
        ) => av == bv && af == bf,
        (Payload::Symbol { name: an, .. }, Payload::Symbol { name: bn, .. }) => an == bn,
        (
            Payload::Stream { kind: ak, ty: at },
            Payload::Stream { kind: bk, ty: bt },
        ) => ak == bk && at == bt,
        _ => false,
    };
    if !payload_match {
        return false;
    }
    a_node
        .kids()
        .iter()
        .zip(b_node.kids())
        .all(|(&ak, &bk)| structurally_equal(a_tab, ak, b_tab, bk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use casm_stream::{IntStream, IntStreamReader, IntStreamWriter};
    use casm_types::{IntFormat, CASM_BINARY_MAGIC, CASM_BINARY_VERSION};

    /// Build the identity filter of the end-to-end scenarios:
    /// `File(Define(file, NoParams, NoLocals, LoopUnbounded(Write(Uint8, Uint8))))`.
    fn identity_filter(symtab: &mut SymbolTable) -> NodeId {
        let sym = symtab.predefined(PredefinedSymbol::File);
        let params = symtab.create(NodeType::NoParams);
        let locals = symtab.create(NodeType::NoLocals);
        let from = symtab.create(NodeType::Uint8NoArgs);
        let to = symtab.create(NodeType::Uint8NoArgs);
        let write = symtab.create_with_kids(NodeType::Write, &[from, to]);
        let body = symtab.create_with_kids(NodeType::LoopUnbounded, &[write]);
        let define = symtab.create_with_kids(NodeType::Define, &[sym, params, locals, body]);
        symtab.create_with_kids(NodeType::File, &[define])
    }

    fn flatten_to_stream(symtab: &SymbolTable) -> casm_stream::IntStreamHandle {
        let stream = IntStream::new().into_handle();
        let flattener = Flattener::new(symtab, IntStreamWriter::new(stream.clone()));
        assert!(flattener.flatten().unwrap());
        stream
    }

    #[test]
    fn flatten_unflatten_identity_filter() {
        let mut symtab = SymbolTable::new();
        let root = identity_filter(&mut symtab);
        symtab.install(root).unwrap();

        let stream = flatten_to_stream(&symtab);
        assert!(stream.borrow().is_frozen());

        let (rebuilt, new_root) = unflatten(stream).unwrap();
        assert!(structurally_equal(&symtab, root, &rebuilt, new_root));
        // The rebuilt table re-binds the define to the file symbol.
        let file_sym = rebuilt.get_symbol("file").unwrap();
        assert!(rebuilt.symbol_define(file_sym).is_some());
    }

    #[test]
    fn default_literal_writes_opcode_zero() {
        let mut symtab = SymbolTable::new();
        let zero = symtab.create_int(NodeType::U32Const, 0);
        let write = symtab.create_with_kids(NodeType::Write, &[zero]);
        let file = symtab.create_with_kids(NodeType::File, &[write]);
        symtab.install(file).unwrap();

        let stream = flatten_to_stream(&symtab);
        let mut reader = IntStreamReader::new(stream);
        assert_eq!(reader.read().unwrap(), u64::from(NodeType::U32Const.opcode()));
        assert_eq!(reader.read().unwrap(), 0);
        // Next comes the Write opcode, not a format code.
        assert_eq!(reader.read().unwrap(), u64::from(NodeType::Write.opcode()));
    }

    #[test]
    fn non_default_literal_writes_format_and_value() {
        let mut symtab = SymbolTable::new();
        let lit = symtab.create_int(NodeType::U32Const, 7);
        let write = symtab.create_with_kids(NodeType::Write, &[lit]);
        let file = symtab.create_with_kids(NodeType::File, &[write]);
        symtab.install(file).unwrap();

        let stream = flatten_to_stream(&symtab);
        let mut reader = IntStreamReader::new(stream);
        assert_eq!(reader.read().unwrap(), u64::from(NodeType::U32Const.opcode()));
        assert_eq!(
            reader.read().unwrap(),
            u64::from(IntFormat::Uint32.code()) + 1
        );
        assert_eq!(reader.read().unwrap(), 7);
    }

    #[test]
    fn file_header_emits_out_of_band_pairs() {
        let mut symtab = SymbolTable::new();
        let magic = symtab.create_int(NodeType::U32Const, u64::from(CASM_BINARY_MAGIC));
        let version = symtab.create_int(NodeType::U32Const, u64::from(CASM_BINARY_VERSION));
        let header = symtab.create_with_kids(NodeType::FileHeader, &[magic, version]);
        let file = symtab.create_with_kids(NodeType::File, &[header]);
        symtab.install(file).unwrap();

        let stream = flatten_to_stream(&symtab);
        assert_eq!(
            stream.borrow().header(),
            &[
                (u64::from(CASM_BINARY_MAGIC), IntFormat::Uint32),
                (u64::from(CASM_BINARY_VERSION), IntFormat::Uint32),
            ]
        );

        let (rebuilt, new_root) = unflatten(stream).unwrap();
        assert!(structurally_equal(&symtab, file, &rebuilt, new_root));
    }

    #[test]
    fn bad_header_literal_reports_and_returns_false() {
        let mut symtab = SymbolTable::new();
        // A u8 literal carrying a varuint64 format does not define an int
        // type format.
        let bad = symtab.create_int_with_format(NodeType::U8Const, 1, IntFormat::Varuint64);
        let header = symtab.create_with_kids(NodeType::FileHeader, &[bad]);
        let file = symtab.create_with_kids(NodeType::File, &[header]);
        symtab.install(file).unwrap();

        let stream = IntStream::new().into_handle();
        let flattener = Flattener::new(&symtab, IntStreamWriter::new(stream.clone()));
        assert!(!flattener.flatten().unwrap());
        assert!(stream.borrow().header().is_empty());
        assert!(stream.borrow().is_frozen());
    }

    #[test]
    fn section_round_trip() {
        let mut symtab = SymbolTable::new();
        let code = symtab.get_or_create_symbol("code");
        let memory = symtab.get_or_create_symbol("memory");
        let body = symtab.create(NodeType::Void);
        let section = symtab.create_with_kids(NodeType::Section, &[code, memory, body]);
        let file = symtab.create_with_kids(NodeType::File, &[section]);
        symtab.install(file).unwrap();

        let stream = flatten_to_stream(&symtab);
        let (rebuilt, new_root) = unflatten(stream).unwrap();
        assert!(structurally_equal(&symtab, file, &rebuilt, new_root));
    }

    #[test]
    fn switch_with_cases_round_trip() {
        let mut symtab = SymbolTable::new();
        let selector = {
            let inner = symtab.create(NodeType::Varuint64NoArgs);
            symtab.create_with_kids(NodeType::Read, &[inner])
        };
        let default = symtab.create(NodeType::Error);
        let mut kids = vec![selector, default];
        for index in 0..3u64 {
            let value = symtab.create_int(NodeType::U64Const, index);
            let action = symtab.create(NodeType::Varint64NoArgs);
            kids.push(symtab.create_with_kids(NodeType::Case, &[value, action]));
        }
        let switch = symtab.create_with_kids(NodeType::Switch, &kids);
        let body = symtab.create_with_kids(NodeType::LoopUnbounded, &[switch]);
        let sym = symtab.predefined(PredefinedSymbol::File);
        let params = symtab.create(NodeType::NoParams);
        let locals = symtab.create(NodeType::NoLocals);
        let define = symtab.create_with_kids(NodeType::Define, &[sym, params, locals, body]);
        let file = symtab.create_with_kids(NodeType::File, &[define]);
        symtab.install(file).unwrap();

        let stream = flatten_to_stream(&symtab);
        let (rebuilt, new_root) = unflatten(stream).unwrap();
        assert!(structurally_equal(&symtab, file, &rebuilt, new_root));
    }

    #[test]
    fn literal_values_round_trip() {
        use proptest::prelude::*;
        let mut runner = proptest::test_runner::TestRunner::default();
        runner
            .run(
                &(any::<u64>(), 0usize..5),
                |(value, which)| {
                    let ty = [
                        NodeType::I32Const,
                        NodeType::I64Const,
                        NodeType::U8Const,
                        NodeType::U32Const,
                        NodeType::U64Const,
                    ][which];
                    let mut symtab = SymbolTable::new();
                    let lit = symtab.create_int(ty, value);
                    let write = symtab.create_with_kids(NodeType::Write, &[lit]);
                    let file = symtab.create_with_kids(NodeType::File, &[write]);
                    symtab.install(file).unwrap();
                    let stream = flatten_to_stream(&symtab);
                    let (rebuilt, new_root) = unflatten(stream).unwrap();
                    prop_assert!(structurally_equal(&symtab, file, &rebuilt, new_root));
                    Ok(())
                },
            )
            .unwrap();
    }

    #[test]
    fn unflatten_rejects_unknown_opcode() {
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream.clone());
        writer.write(999).unwrap();
        writer.write_freeze_eof().unwrap();
        assert!(matches!(
            unflatten(stream),
            Err(casm_error::CasmError::NoSuchNodeType { opcode: 999 })
        ));
    }
}
