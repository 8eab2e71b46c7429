//! Arena-allocated filter AST nodes.

use casm_types::{IntFormat, IntValue, StreamKind, StreamType};

use crate::node_type::NodeType;

/// Handle to a node in a [`SymbolTable`](crate::SymbolTable) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The closed set of predefined symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PredefinedSymbol {
    /// The file-level entry point.
    File = 0,
    /// Block-enter action.
    BlockEnter = 1,
    /// Block-exit action.
    BlockExit = 2,
    /// Block-enter action applied on the write side only.
    BlockEnterWriteonly = 3,
    /// Block-exit action applied on the write side only.
    BlockExitWriteonly = 4,
    /// Octet-alignment action.
    Align = 5,
}

impl PredefinedSymbol {
    /// All predefined symbols, in code order.
    pub const ALL: [Self; 6] = [
        Self::File,
        Self::BlockEnter,
        Self::BlockExit,
        Self::BlockEnterWriteonly,
        Self::BlockExitWriteonly,
        Self::Align,
    ];

    /// Stable wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Recover from a wire code.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::File),
            1 => Some(Self::BlockEnter),
            2 => Some(Self::BlockExit),
            3 => Some(Self::BlockEnterWriteonly),
            4 => Some(Self::BlockExitWriteonly),
            5 => Some(Self::Align),
            _ => None,
        }
    }

    /// Filter-language spelling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::BlockEnter => "block.enter",
            Self::BlockExit => "block.exit",
            Self::BlockEnterWriteonly => "block.enter.writeonly",
            Self::BlockExitWriteonly => "block.exit.writeonly",
            Self::Align => "align",
        }
    }
}

/// Per-tag payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No payload.
    None,
    /// Integer payload: literals, bit counts, parameter indices, accepted
    /// prefix-code values.
    Int {
        /// The carried value.
        value: IntValue,
        /// Wire format of the value.
        format: IntFormat,
    },
    /// Symbol payload.
    Symbol {
        /// Symbol name.
        name: String,
        /// Body of the symbol's `define`, if any.
        define: Option<NodeId>,
        /// Predefined-symbol tag, if any.
        predefined: Option<PredefinedSymbol>,
    },
    /// Stream-check payload.
    Stream {
        /// Which side is checked.
        kind: StreamKind,
        /// Expected stream granularity.
        ty: StreamType,
    },
}

/// One filter AST node: a tag, an ordered child list, and a payload.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) ty: NodeType,
    pub(crate) kids: Vec<NodeId>,
    pub(crate) payload: Payload,
    /// For `Param` nodes: the symbol of the enclosing define, fixed up at
    /// install time.
    pub(crate) defining_sym: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(ty: NodeType, payload: Payload) -> Self {
        Self {
            ty,
            kids: Vec::new(),
            payload,
            defining_sym: None,
        }
    }

    /// The node's tag.
    #[must_use]
    pub fn ty(&self) -> NodeType {
        self.ty
    }

    /// Ordered child list.
    #[must_use]
    pub fn kids(&self) -> &[NodeId] {
        &self.kids
    }

    /// Number of children.
    #[must_use]
    pub fn num_kids(&self) -> usize {
        self.kids.len()
    }

    /// Child at `index`, if present.
    #[must_use]
    pub fn kid(&self, index: usize) -> Option<NodeId> {
        self.kids.get(index).copied()
    }

    /// The node's payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Integer payload value, for integer-carrying tags.
    #[must_use]
    pub fn value(&self) -> Option<IntValue> {
        match self.payload {
            Payload::Int { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Integer payload format, for integer-carrying tags.
    #[must_use]
    pub fn format(&self) -> Option<IntFormat> {
        match self.payload {
            Payload::Int { format, .. } => Some(format),
            _ => None,
        }
    }

    /// Whether the integer payload equals its format's zero element, which
    /// suppresses the value on the wire.
    #[must_use]
    pub fn is_default_value(&self) -> bool {
        matches!(self.payload, Payload::Int { value: 0, .. })
    }

    /// Whether this is an integer literal usable as a header pair: the
    /// carried format must be the tag's natural format and must be able to
    /// represent the value.
    #[must_use]
    pub fn defines_int_type_format(&self) -> bool {
        let Payload::Int { value, format } = self.payload else {
            return false;
        };
        match self.ty.natural_format() {
            Some(natural) => format == natural && format.can_represent(value),
            None => false,
        }
    }
}
