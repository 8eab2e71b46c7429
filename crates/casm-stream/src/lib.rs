//! Stream plumbing for the CASM compressor.
//!
//! Three layers, bottom up:
//!
//! 1. [`ByteQueue`] — a growable page-allocated byte buffer with an optional
//!    pull source and a one-way freeze-at-eof transition.
//! 2. [`ReadCursor`] / [`WriteCursor`] — positions into a shared queue that
//!    read and write bytes, MSB-first sub-byte bit runs, fixed-width
//!    integers, and LEB128 varints, with a block end-address stack and
//!    backpatchable block size prefixes.
//! 3. [`IntStream`] — the logical sequence of tagged integers, block
//!    brackets, and align events that sits between the module parser and
//!    the abbreviation engine, with its own reader/writer pair.

mod cursor;
mod int_stream;
mod queue;

pub use cursor::{ReadCursor, WriteCursor};
pub use int_stream::{IntEvent, IntStream, IntStreamHandle, IntStreamReader, IntStreamWriter};
pub use queue::{ByteQueue, QueueHandle};
