//! Suspendable interpreter for CASM filter programs.
//!
//! The [`Interpreter`] evaluates an installed filter AST against a byte
//! read cursor and a pluggable write backend: [`ByteWriter`] for
//! byte-to-byte decompression, [`IntWriter`] for parsing a module into a
//! logical integer stream.

mod interpreter;
mod writer;

pub use interpreter::Interpreter;
pub use writer::{BlockMark, ByteWriter, IntWriter, InterpWriter};
