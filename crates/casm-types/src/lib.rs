//! Core value types shared across the CASM compressor workspace.
//!
//! This crate sits at the bottom of the dependency DAG. It defines the
//! integer value model (a 64-bit payload tagged with one of seven wire
//! formats), the stream taxonomy, the magic/version constants of the three
//! recognized containers, and the tunable limits of the compression
//! pipeline.

pub mod limits;

use std::fmt;

/// The universal integer payload carried through every stream.
///
/// Format governs encoding width on the wire, not value semantics, so a
/// single unsigned 64-bit carrier is enough for all seven formats. Signed
/// varint formats reinterpret the bits at the codec boundary.
pub type IntValue = u64;

// ---------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------

/// The seven recognized wire encodings for an [`IntValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[repr(u8)]
pub enum IntFormat {
    /// One raw octet.
    Uint8 = 0,
    /// Four little-endian octets.
    Uint32 = 1,
    /// Eight little-endian octets.
    Uint64 = 2,
    /// Signed LEB128, at most 32 significant bits.
    Varint32 = 3,
    /// Signed LEB128, at most 64 significant bits.
    Varint64 = 4,
    /// Unsigned LEB128, at most 32 significant bits.
    Varuint32 = 5,
    /// Unsigned LEB128, at most 64 significant bits.
    Varuint64 = 6,
}

impl IntFormat {
    /// All formats, in tag order.
    pub const ALL: [Self; 7] = [
        Self::Uint8,
        Self::Uint32,
        Self::Uint64,
        Self::Varint32,
        Self::Varint64,
        Self::Varuint32,
        Self::Varuint64,
    ];

    /// Recover a format from its wire tag.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Uint8),
            1 => Some(Self::Uint32),
            2 => Some(Self::Uint64),
            3 => Some(Self::Varint32),
            4 => Some(Self::Varint64),
            5 => Some(Self::Varuint32),
            6 => Some(Self::Varuint64),
            _ => None,
        }
    }

    /// Wire tag of this format.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Display name, matching the filter-language spelling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Varint32 => "varint32",
            Self::Varint64 => "varint64",
            Self::Varuint32 => "varuint32",
            Self::Varuint64 => "varuint64",
        }
    }

    /// Whether this format has a fixed wire width.
    #[must_use]
    pub const fn is_fixed_width(self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint32 | Self::Uint64)
    }

    /// Number of wire bytes needed to carry `value` in this format.
    #[must_use]
    pub fn byte_size(self, value: IntValue) -> usize {
        match self {
            Self::Uint8 => 1,
            Self::Uint32 => 4,
            Self::Uint64 => 8,
            Self::Varuint32 | Self::Varuint64 => varuint_size(value),
            Self::Varint32 | Self::Varint64 => varint_size(value as i64),
        }
    }

    /// Whether `value` is representable in this format.
    #[must_use]
    pub fn can_represent(self, value: IntValue) -> bool {
        match self {
            Self::Uint8 => value <= u64::from(u8::MAX),
            Self::Uint32 | Self::Varuint32 => value <= u64::from(u32::MAX),
            Self::Varint32 => {
                let v = value as i64;
                i64::from(i32::MIN) <= v && v <= i64::from(i32::MAX)
            }
            Self::Uint64 | Self::Varint64 | Self::Varuint64 => true,
        }
    }
}

impl fmt::Display for IntFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of LEB128 bytes for an unsigned value.
#[must_use]
pub const fn varuint_size(value: u64) -> usize {
    let mut v = value;
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Number of signed LEB128 bytes for a value.
#[must_use]
pub const fn varint_size(value: i64) -> usize {
    let mut v = value;
    let mut n = 0;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        n += 1;
        let sign_clear = byte & 0x40 == 0;
        if (v == 0 && sign_clear) || (v == -1 && !sign_clear) {
            return n;
        }
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Which side of the interpreter a stream sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Read side.
    Input,
    /// Write side.
    Output,
}

/// Granularity of a stream's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamType {
    /// Octet-aligned raw bytes.
    Byte = 0,
    /// Sub-octet bits.
    Bit = 1,
    /// Logical tagged integers with block brackets.
    Int = 2,
    /// Filter AST nodes (not persisted; reserved).
    Ast = 3,
}

impl StreamType {
    /// Recover a stream type from its wire tag.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Byte),
            1 => Some(Self::Bit),
            2 => Some(Self::Int),
            3 => Some(Self::Ast),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Container magic / version constants
// ---------------------------------------------------------------------------

/// Magic number of an uncompressed module ("\0asm", little-endian).
pub const WASM_BINARY_MAGIC: u32 = 0x6d73_6100;
/// Module version understood by this implementation.
pub const WASM_BINARY_VERSION: u32 = 0xd;

/// Magic number of a CASM compressed-assembly stream ("casm").
pub const CASM_BINARY_MAGIC: u32 = 0x6d73_6163;
/// CASM stream version produced and consumed here.
pub const CASM_BINARY_VERSION: u32 = 0x0;

/// Magic number of the optional CISM enclosing model ("cism").
pub const CISM_BINARY_MAGIC: u32 = 0x6d73_6963;
/// CISM model version referenced by codegen.
pub const CISM_BINARY_VERSION: u32 = 0x0;

// ---------------------------------------------------------------------------
// Abbreviation indices
// ---------------------------------------------------------------------------

/// A dense non-negative integer substituting for a matched integer
/// subsequence or stream event on the wire.
///
/// Indices are assigned contiguously from zero by cutoff selection; the
/// synthetic events (defaults, block brackets, align) always occupy the
/// lowest indices so they stay stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[repr(transparent)]
pub struct AbbrevIndex(u32);

impl AbbrevIndex {
    /// Wrap a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw dense index.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The index as a stream value.
    #[must_use]
    pub const fn as_value(self) -> IntValue {
        self.0 as IntValue
    }
}

impl fmt::Display for AbbrevIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_codes_round_trip() {
        for format in IntFormat::ALL {
            assert_eq!(IntFormat::from_code(format.code()), Some(format));
        }
        assert_eq!(IntFormat::from_code(7), None);
    }

    #[test]
    fn fixed_width_sizes() {
        assert_eq!(IntFormat::Uint8.byte_size(0), 1);
        assert_eq!(IntFormat::Uint32.byte_size(u64::from(u32::MAX)), 4);
        assert_eq!(IntFormat::Uint64.byte_size(u64::MAX), 8);
    }

    #[test]
    fn varuint_sizes() {
        assert_eq!(varuint_size(0), 1);
        assert_eq!(varuint_size(127), 1);
        assert_eq!(varuint_size(128), 2);
        assert_eq!(varuint_size(300), 2);
        assert_eq!(varuint_size(16384), 3);
        assert_eq!(varuint_size(u64::MAX), 10);
    }

    #[test]
    fn varint_sizes() {
        assert_eq!(varint_size(0), 1);
        assert_eq!(varint_size(63), 1);
        assert_eq!(varint_size(64), 2);
        assert_eq!(varint_size(-64), 1);
        assert_eq!(varint_size(-65), 2);
        assert_eq!(varint_size(i64::MIN), 10);
    }

    #[test]
    fn representability() {
        assert!(IntFormat::Uint8.can_represent(255));
        assert!(!IntFormat::Uint8.can_represent(256));
        assert!(IntFormat::Varuint32.can_represent(u64::from(u32::MAX)));
        assert!(!IntFormat::Varuint32.can_represent(u64::from(u32::MAX) + 1));
        assert!(IntFormat::Varint32.can_represent((-5_i64) as u64));
        assert!(!IntFormat::Varint32.can_represent(u64::from(u32::MAX)));
        assert!(IntFormat::Varuint64.can_represent(u64::MAX));
    }

    #[test]
    fn stream_type_codes() {
        assert_eq!(StreamType::from_code(0), Some(StreamType::Byte));
        assert_eq!(StreamType::from_code(2), Some(StreamType::Int));
        assert_eq!(StreamType::from_code(4), None);
    }

    #[test]
    fn abbrev_index() {
        let index = AbbrevIndex::new(5);
        assert_eq!(index.get(), 5);
        assert_eq!(index.as_value(), 5);
        assert_eq!(index.to_string(), "5");
    }
}
