//! The closed table of filter AST node tags.
//!
//! Every node in a filter program carries one of these tags; the tag fixes
//! the node's arity class, whether it carries an integer payload, and how
//! the flattener serializes it. The numeric values are the CASM wire
//! opcodes and must stay stable.

use casm_types::IntFormat;

/// Filter AST node tags. Numeric values are the CASM opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeType {
    // === Integer Literals ===
    /// Signed 32-bit literal.
    I32Const = 0,
    /// Signed 64-bit literal.
    I64Const = 1,
    /// Unsigned 8-bit literal.
    U8Const = 2,
    /// Unsigned 32-bit literal.
    U32Const = 3,
    /// Unsigned 64-bit literal.
    U64Const = 4,

    // === Primitive Read/Write ===
    /// Read/write one octet.
    Uint8NoArgs = 5,
    /// Read/write `n` bits of an octet (n carried as the payload).
    Uint8OneArg = 6,
    /// Read/write a 4-byte little-endian integer.
    Uint32NoArgs = 7,
    /// Read/write `n` bits of a 32-bit integer.
    Uint32OneArg = 8,
    /// Read/write an 8-byte little-endian integer.
    Uint64NoArgs = 9,
    /// Read/write `n` bits of a 64-bit integer.
    Uint64OneArg = 10,
    /// Read/write a signed LEB128, 32-bit range.
    Varint32NoArgs = 11,
    /// Chunked signed varint32 (chunk bits carried as the payload).
    Varint32OneArg = 12,
    /// Read/write a signed LEB128, 64-bit range.
    Varint64NoArgs = 13,
    /// Chunked signed varint64.
    Varint64OneArg = 14,
    /// Read/write an unsigned LEB128, 32-bit range.
    Varuint32NoArgs = 15,
    /// Chunked unsigned varuint32.
    Varuint32OneArg = 16,
    /// Read/write an unsigned LEB128, 64-bit range.
    Varuint64NoArgs = 17,
    /// Chunked unsigned varuint64.
    Varuint64OneArg = 18,

    // === Control Flow ===
    /// Size-prefixed block around its single child.
    Block = 19,
    /// Counted loop: `Loop(count-expr, body)`.
    Loop = 20,
    /// Loop until end of input block: `LoopUnbounded(body)`.
    LoopUnbounded = 21,
    /// `IfThen(cond, then)`.
    IfThen = 22,
    /// `IfThenElse(cond, then, else)`.
    IfThenElse = 23,
    /// `Switch(selector, default, case*)`.
    Switch = 24,
    /// `Case(value-literal, action)`.
    Case = 25,
    /// Evaluate children in order.
    Sequence = 26,
    /// Call a define: `Eval(symbol, arg*)`.
    Eval = 27,
    /// Function definition: `Define(symbol, params, locals, body)`.
    Define = 28,
    /// Positional parameter reference (index carried as the payload).
    Param = 29,
    /// Parameter-count declaration (count carried as the payload).
    ParamValues = 30,
    /// Zero-parameter declaration.
    NoParams = 31,
    /// Zero-locals declaration.
    NoLocals = 32,
    /// Value mapping: `Map(selector, case*)`.
    Map = 33,
    /// Multi-level opcode selector: `Opcode(selector, case*)`.
    Opcode = 34,

    // === Boolean / Bit Operations ===
    /// Short-circuit and.
    And = 35,
    /// Short-circuit or.
    Or = 36,
    /// Logical negation.
    Not = 37,
    /// Bitwise and.
    BitwiseAnd = 38,
    /// Bitwise or.
    BitwiseOr = 39,
    /// Bitwise xor.
    BitwiseXor = 40,
    /// Bitwise complement.
    BitwiseNegate = 41,
    /// Test the current section name against a symbol.
    LastSymbolIs = 42,

    // === Prefix Code ===
    /// Decode one symbol by walking a binary selector tree bit by bit.
    BinaryEval = 43,
    /// Two-way branch in a selector tree.
    BinarySelect = 44,
    /// Selector tree leaf; the accepted value is the payload.
    BinaryAccept = 45,

    // === Structural ===
    /// Outermost container; children are emitted inline.
    File = 46,
    /// Source header pairs of the file.
    FileHeader = 47,
    /// Header pairs describing the expected input container.
    ReadHeader = 48,
    /// Header pairs describing the produced output container.
    WriteHeader = 49,
    /// Stream kind/type check.
    Stream = 50,
    /// Named module section with a private symbol index space.
    Section = 51,
    /// Symbol reference.
    Symbol = 52,
    /// Invoke a named action on the writer.
    Callback = 53,
    /// `Rename(from-symbol, to-symbol)`.
    Rename = 54,
    /// Remove a symbol's definition.
    Undefine = 55,
    /// Bind a literal action to a name: `LiteralDef(symbol, literal)`.
    LiteralDef = 56,
    /// Use a literal action by name.
    LiteralUse = 57,
    /// Unconditional failure.
    Error = 58,
    /// No operation; reads as zero.
    Void = 59,
    /// Read without consuming: `Peek(expr)`.
    Peek = 60,
    /// Force read context: `Read(expr)`.
    Read = 61,
    /// Force write context: `Write(format, value*)`.
    Write = 62,
    /// The most recently read value.
    LastRead = 63,
    /// Stream conversion (not evaluable).
    Convert = 64,
    /// Filter chain (not evaluable).
    Filter = 65,
    /// Reference to enclosing algorithms by name.
    EnclosingAlgorithms = 66,
    /// Placeholder for an unrecognized section (never flattened).
    UnknownSection = 67,
}

/// Arity class of a node tag, as the flattener sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many children; postorder, no child count on the wire.
    Fixed(usize),
    /// Any number of children; postorder plus an explicit child count.
    Variable,
    /// Custom flatten/unflatten rule (File, headers, Stream, Section,
    /// Symbol).
    Special,
}

/// Static per-tag metadata row.
#[derive(Debug, Clone, Copy)]
pub struct NodeTypeInfo {
    /// The tag this row describes.
    pub ty: NodeType,
    /// Filter-language spelling.
    pub name: &'static str,
    /// Arity class.
    pub arity: Arity,
    /// Whether the node carries an integer payload serialized as
    /// `opcode, 0` (default) or `opcode, format+1, value`.
    pub int_node: bool,
    /// Natural wire format of an integer literal tag, used by
    /// `defines_int_type_format`.
    pub natural_format: Option<IntFormat>,
}

macro_rules! info {
    ($ty:ident, $name:literal, $arity:expr, $int:expr, $fmt:expr) => {
        NodeTypeInfo {
            ty: NodeType::$ty,
            name: $name,
            arity: $arity,
            int_node: $int,
            natural_format: $fmt,
        }
    };
}

/// The closed node-type table, indexed by opcode.
///
/// Dispatch tables elsewhere are generated from this single source of
/// truth; `node_table_is_dense` in the tests guarantees completeness.
pub const NODE_TYPE_TABLE: [NodeTypeInfo; 68] = [
    info!(I32Const, "i32.const", Arity::Fixed(0), true, Some(IntFormat::Varint32)),
    info!(I64Const, "i64.const", Arity::Fixed(0), true, Some(IntFormat::Varint64)),
    info!(U8Const, "u8.const", Arity::Fixed(0), true, Some(IntFormat::Uint8)),
    info!(U32Const, "u32.const", Arity::Fixed(0), true, Some(IntFormat::Uint32)),
    info!(U64Const, "u64.const", Arity::Fixed(0), true, Some(IntFormat::Uint64)),
    info!(Uint8NoArgs, "uint8", Arity::Fixed(0), false, None),
    info!(Uint8OneArg, "uint8.bits", Arity::Fixed(0), true, None),
    info!(Uint32NoArgs, "uint32", Arity::Fixed(0), false, None),
    info!(Uint32OneArg, "uint32.bits", Arity::Fixed(0), true, None),
    info!(Uint64NoArgs, "uint64", Arity::Fixed(0), false, None),
    info!(Uint64OneArg, "uint64.bits", Arity::Fixed(0), true, None),
    info!(Varint32NoArgs, "varint32", Arity::Fixed(0), false, None),
    info!(Varint32OneArg, "varint32.bits", Arity::Fixed(0), true, None),
    info!(Varint64NoArgs, "varint64", Arity::Fixed(0), false, None),
    info!(Varint64OneArg, "varint64.bits", Arity::Fixed(0), true, None),
    info!(Varuint32NoArgs, "varuint32", Arity::Fixed(0), false, None),
    info!(Varuint32OneArg, "varuint32.bits", Arity::Fixed(0), true, None),
    info!(Varuint64NoArgs, "varuint64", Arity::Fixed(0), false, None),
    info!(Varuint64OneArg, "varuint64.bits", Arity::Fixed(0), true, None),
    info!(Block, "block", Arity::Fixed(1), false, None),
    info!(Loop, "loop", Arity::Fixed(2), false, None),
    info!(LoopUnbounded, "loop.unbounded", Arity::Fixed(1), false, None),
    info!(IfThen, "if", Arity::Fixed(2), false, None),
    info!(IfThenElse, "if.else", Arity::Fixed(3), false, None),
    info!(Switch, "switch", Arity::Variable, false, None),
    info!(Case, "case", Arity::Fixed(2), false, None),
    info!(Sequence, "seq", Arity::Variable, false, None),
    info!(Eval, "eval", Arity::Variable, false, None),
    info!(Define, "define", Arity::Variable, false, None),
    info!(Param, "param", Arity::Fixed(0), true, None),
    info!(ParamValues, "params", Arity::Fixed(0), true, None),
    info!(NoParams, "params.none", Arity::Fixed(0), false, None),
    info!(NoLocals, "locals.none", Arity::Fixed(0), false, None),
    info!(Map, "map", Arity::Variable, false, None),
    info!(Opcode, "opcode", Arity::Variable, false, None),
    info!(And, "and", Arity::Fixed(2), false, None),
    info!(Or, "or", Arity::Fixed(2), false, None),
    info!(Not, "not", Arity::Fixed(1), false, None),
    info!(BitwiseAnd, "bitwise.and", Arity::Fixed(2), false, None),
    info!(BitwiseOr, "bitwise.or", Arity::Fixed(2), false, None),
    info!(BitwiseXor, "bitwise.xor", Arity::Fixed(2), false, None),
    info!(BitwiseNegate, "bitwise.negate", Arity::Fixed(1), false, None),
    info!(LastSymbolIs, "last.symbol.is", Arity::Fixed(1), false, None),
    info!(BinaryEval, "binary.eval", Arity::Fixed(1), false, None),
    info!(BinarySelect, "binary.select", Arity::Fixed(2), false, None),
    info!(BinaryAccept, "binary.accept", Arity::Fixed(0), true, None),
    info!(File, "file", Arity::Special, false, None),
    info!(FileHeader, "header", Arity::Special, false, None),
    info!(ReadHeader, "header.read", Arity::Special, false, None),
    info!(WriteHeader, "header.write", Arity::Special, false, None),
    info!(Stream, "stream", Arity::Special, false, None),
    info!(Section, "section", Arity::Special, false, None),
    info!(Symbol, "symbol", Arity::Special, false, None),
    info!(Callback, "callback", Arity::Fixed(1), false, None),
    info!(Rename, "rename", Arity::Fixed(2), false, None),
    info!(Undefine, "undefine", Arity::Fixed(1), false, None),
    info!(LiteralDef, "literal", Arity::Fixed(2), false, None),
    info!(LiteralUse, "literal.use", Arity::Fixed(1), false, None),
    info!(Error, "error", Arity::Fixed(0), false, None),
    info!(Void, "void", Arity::Fixed(0), false, None),
    info!(Peek, "peek", Arity::Fixed(1), false, None),
    info!(Read, "read", Arity::Fixed(1), false, None),
    info!(Write, "write", Arity::Variable, false, None),
    info!(LastRead, "read.last", Arity::Fixed(0), false, None),
    info!(Convert, "convert", Arity::Fixed(2), false, None),
    info!(Filter, "filter", Arity::Variable, false, None),
    info!(EnclosingAlgorithms, "algorithms", Arity::Variable, false, None),
    info!(UnknownSection, "unknown.section", Arity::Special, false, None),
];

impl NodeType {
    /// The table row for this tag.
    #[must_use]
    pub const fn info(self) -> &'static NodeTypeInfo {
        &NODE_TYPE_TABLE[self as usize]
    }

    /// Filter-language spelling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.info().name
    }

    /// Arity class.
    #[must_use]
    pub const fn arity(self) -> Arity {
        self.info().arity
    }

    /// Whether the node carries an integer payload on the wire.
    #[must_use]
    pub const fn is_int_node(self) -> bool {
        self.info().int_node
    }

    /// Natural format of an integer literal tag.
    #[must_use]
    pub const fn natural_format(self) -> Option<IntFormat> {
        self.info().natural_format
    }

    /// CASM wire opcode.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Recover a tag from its wire opcode.
    #[must_use]
    pub fn from_opcode(opcode: u64) -> Option<Self> {
        let index = usize::try_from(opcode).ok()?;
        NODE_TYPE_TABLE.get(index).map(|info| info.ty)
    }

    /// Whether this tag is one of the five integer literal constants.
    #[must_use]
    pub const fn is_literal_const(self) -> bool {
        matches!(
            self,
            Self::I32Const | Self::I64Const | Self::U8Const | Self::U32Const | Self::U64Const
        )
    }

    /// The literal tag whose natural format is `format`.
    #[must_use]
    pub const fn literal_for_format(format: IntFormat) -> Self {
        match format {
            IntFormat::Uint8 => Self::U8Const,
            IntFormat::Uint32 => Self::U32Const,
            IntFormat::Varint32 => Self::I32Const,
            IntFormat::Varint64 => Self::I64Const,
            IntFormat::Uint64 | IntFormat::Varuint32 | IntFormat::Varuint64 => Self::U64Const,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_table_is_dense() {
        for (index, info) in NODE_TYPE_TABLE.iter().enumerate() {
            assert_eq!(
                info.ty as usize, index,
                "table row {index} holds {:?}",
                info.ty
            );
        }
    }

    #[test]
    fn opcode_round_trip() {
        for info in &NODE_TYPE_TABLE {
            assert_eq!(NodeType::from_opcode(u64::from(info.ty.opcode())), Some(info.ty));
        }
        assert_eq!(NodeType::from_opcode(NODE_TYPE_TABLE.len() as u64), None);
    }

    #[test]
    fn literal_tags_have_natural_formats() {
        for info in &NODE_TYPE_TABLE {
            assert_eq!(info.ty.is_literal_const(), info.natural_format.is_some());
        }
    }

    #[test]
    fn int_nodes_are_leaves() {
        for info in &NODE_TYPE_TABLE {
            if info.int_node {
                assert_eq!(info.arity, Arity::Fixed(0), "{} carries kids", info.name);
            }
        }
    }
}
