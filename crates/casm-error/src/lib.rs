//! The single, unified error type for the CASM compressor workspace.
//!
//! Every crate in the workspace reports failures through [`CasmError`], so a
//! fatal condition anywhere in the pipeline propagates with `?` all the way
//! up to the CLI driver, where it is mapped to a process exit code.
//! Non-fatal AST-flatten problems do not use this type at all; they
//! accumulate on the flattener's error flag and surface as a `false` return.

use thiserror::Error;

/// Primary error type for CASM compression and decompression.
///
/// Variants are grouped by the failure taxonomy: format errors (malformed
/// input), AST errors (ill-formed filter programs), call errors (bad
/// `eval`/`param` usage), and stream errors (frozen-stream violations).
#[derive(Error, Debug)]
pub enum CasmError {
    // === Format Errors ===
    /// Input did not start with the expected magic number.
    #[error("bad magic number: found {found:#010x}, expected {expected:#010x}")]
    BadMagic { found: u32, expected: u32 },

    /// Input carried a version this implementation does not know.
    #[error("unknown version number: {found:#010x}")]
    BadVersion { found: u32 },

    /// A varint ran past its maximum encodable width.
    #[error("malformed varint: continuation past {max_bits} bits")]
    VarintOverflow { max_bits: u32 },

    /// A section name was cut short by end of input.
    #[error("truncated section name: expected {expected} bytes, got {actual}")]
    TruncatedName { expected: usize, actual: usize },

    /// A block's declared size runs past the enclosing boundary.
    #[error("block size {size} overflows enclosing boundary at {limit}")]
    BlockSizeOverflow { size: u64, limit: u64 },

    /// A header pair did not match the declared format.
    #[error("header value mismatch: expected format {expected}, got {actual}")]
    HeaderMismatch { expected: String, actual: String },

    // === AST Errors ===
    /// An opcode read from a CASM stream names no known node type.
    #[error("no such node type: opcode {opcode}")]
    NoSuchNodeType { opcode: u64 },

    /// A node type appeared where it cannot be evaluated.
    #[error("cannot evaluate node: {name}")]
    CannotEvaluate { name: &'static str },

    /// A `Switch` selector matched no case and no default was usable.
    #[error("no case matches selector value {selector}")]
    NoSuchCase { selector: u64 },

    /// Unflatten found fewer nodes on the stack than an opcode's arity.
    #[error("malformed opcode stream: {name} wants {wanted} children, stack has {have}")]
    ArityUnderflow {
        name: &'static str,
        wanted: usize,
        have: usize,
    },

    /// A symbol index was out of range for the section symbol table.
    #[error("symbol index {index} out of range (section has {len} symbols)")]
    BadSymbolIndex { index: u64, len: usize },

    // === Call Errors ===
    /// An `Eval` call's argument count disagrees with the define's params.
    #[error("call to '{symbol}' expects {expected} parameters, found {actual}")]
    ArityMismatch {
        symbol: String,
        expected: u64,
        actual: u64,
    },

    /// A `Param` reference found no matching enclosing `Eval`.
    #[error("cannot resolve parameter reference {index}: no enclosing call")]
    UnboundParameter { index: u64 },

    /// A symbol had no define body where one was required.
    #[error("symbol '{name}' has no definition")]
    Undefined { name: String },

    // === Abbreviation Errors ===
    /// A selected count-trie node carried no abbreviation index.
    #[error("selected trie node is missing its abbreviation index")]
    MissingAbbrevIndex,

    // === Stream Errors ===
    /// An attempt was made to write a stream after freeze-eof.
    #[error("write to frozen stream")]
    WriteToFrozen,

    /// Evaluation required input past the frozen end of stream.
    #[error("read past frozen end of stream at address {address}")]
    ReadPastEof { address: usize },

    /// An `Error` node was evaluated.
    #[error("error node evaluated in filter program")]
    FilterError,

    // === Driver Errors ===
    /// File I/O error from the CLI driver.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feature recognized but not supported by this build.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error codes for CLI exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Malformed input (magic, varints, truncation, block sizes).
    Format = 1,
    /// Ill-formed filter AST.
    Ast = 2,
    /// Bad call structure (arity, unbound parameters).
    Call = 3,
    /// Frozen-stream violation.
    Stream = 4,
    /// I/O failure.
    Io = 5,
    /// Internal logic error.
    Internal = 6,
}

impl CasmError {
    /// Map this error to its coarse [`ErrorCode`].
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::BadMagic { .. }
            | Self::BadVersion { .. }
            | Self::VarintOverflow { .. }
            | Self::TruncatedName { .. }
            | Self::BlockSizeOverflow { .. }
            | Self::HeaderMismatch { .. } => ErrorCode::Format,
            Self::NoSuchNodeType { .. }
            | Self::CannotEvaluate { .. }
            | Self::NoSuchCase { .. }
            | Self::ArityUnderflow { .. }
            | Self::BadSymbolIndex { .. }
            | Self::FilterError => ErrorCode::Ast,
            Self::ArityMismatch { .. }
            | Self::UnboundParameter { .. }
            | Self::Undefined { .. } => ErrorCode::Call,
            Self::WriteToFrozen | Self::ReadPastEof { .. } => ErrorCode::Stream,
            Self::Io(_) => ErrorCode::Io,
            Self::MissingAbbrevIndex | Self::NotImplemented(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Process exit code for this error (for CLI use).
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.error_code() as i32
    }

    /// Whether this error indicates malformed input rather than a bug.
    #[must_use]
    pub const fn is_format(&self) -> bool {
        matches!(self.error_code(), ErrorCode::Format)
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a not-implemented error.
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented(feature.into())
    }

    /// Create an undefined-symbol error.
    pub fn undefined(name: impl Into<String>) -> Self {
        Self::Undefined { name: name.into() }
    }
}

/// Result type alias using `CasmError`.
pub type Result<T> = std::result::Result<T, CasmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CasmError::BadMagic {
            found: 0xdead_beef,
            expected: 0x6d73_6100,
        };
        assert_eq!(
            err.to_string(),
            "bad magic number: found 0xdeadbeef, expected 0x6d736100"
        );
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            CasmError::BadVersion { found: 2 }.error_code(),
            ErrorCode::Format
        );
        assert_eq!(
            CasmError::NoSuchNodeType { opcode: 99 }.error_code(),
            ErrorCode::Ast
        );
        assert_eq!(
            CasmError::UnboundParameter { index: 0 }.error_code(),
            ErrorCode::Call
        );
        assert_eq!(CasmError::WriteToFrozen.error_code(), ErrorCode::Stream);
        assert_eq!(
            CasmError::internal("bug").error_code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(
            CasmError::BadMagic {
                found: 0,
                expected: 1
            }
            .exit_code(),
            1
        );
        assert_eq!(CasmError::WriteToFrozen.exit_code(), 4);
        assert_eq!(CasmError::internal("x").exit_code(), 6);
    }

    #[test]
    fn is_format() {
        assert!(CasmError::VarintOverflow { max_bits: 64 }.is_format());
        assert!(!CasmError::FilterError.is_format());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: CasmError = io_err.into();
        assert!(matches!(err, CasmError::Io(_)));
        assert_eq!(err.error_code(), ErrorCode::Io);
    }

    #[test]
    fn convenience_constructors() {
        let err = CasmError::undefined("opcode");
        assert!(matches!(err, CasmError::Undefined { name } if name == "opcode"));

        let err = CasmError::not_implemented("cism decode");
        assert!(matches!(err, CasmError::NotImplemented(msg) if msg == "cism decode"));
    }
}
