//! The logical integer stream sitting between the module parser and the
//! abbreviation engine.
//!
//! An [`IntStream`] is a writable log of tagged integer values, abbreviation
//! indices, block brackets, and align events, plus a typed header of
//! `(value, format)` pairs carried out of band. Readers advance a logical
//! index; block-end and stream-end are distinct conditions. A peek-position
//! stack supports bounded lookahead and multi-pass writers.

use std::cell::RefCell;
use std::rc::Rc;

use casm_error::{CasmError, Result};
use casm_types::limits::RESUME_HEADROOM_INTS;
use casm_types::{IntFormat, IntValue};

/// One entry in the integer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntEvent {
    /// A tagged integer value.
    Value {
        /// The 64-bit payload.
        value: IntValue,
        /// Wire encoding the value takes when serialized.
        format: IntFormat,
    },
    /// An abbreviation index (serialized in the abbreviation format, or as
    /// a Huffman bit code when prefix coding is enabled).
    Abbrev {
        /// The dense abbreviation index.
        value: IntValue,
    },
    /// Block-enter bracket.
    BlockEnter,
    /// Block-exit bracket.
    BlockExit,
    /// Octet-alignment event.
    Align,
}

/// Shared handle to an [`IntStream`].
pub type IntStreamHandle = Rc<RefCell<IntStream>>;

/// A writable log of integer events with a typed header.
#[derive(Debug, Default)]
pub struct IntStream {
    header: Vec<(IntValue, IntFormat)>,
    events: Vec<IntEvent>,
    frozen: bool,
}

impl IntStream {
    /// New empty, unfrozen stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in a shared handle.
    #[must_use]
    pub fn into_handle(self) -> IntStreamHandle {
        Rc::new(RefCell::new(self))
    }

    /// Number of events written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events have been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the freeze-eof transition has happened.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The out-of-band header pairs.
    #[must_use]
    pub fn header(&self) -> &[(IntValue, IntFormat)] {
        &self.header
    }

    /// Event at `index`, if written.
    #[must_use]
    pub fn event_at(&self, index: usize) -> Option<IntEvent> {
        self.events.get(index).copied()
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// The single write cursor of an [`IntStream`].
#[derive(Debug)]
pub struct IntStreamWriter {
    stream: IntStreamHandle,
}

impl IntStreamWriter {
    /// Writer appending to `stream`.
    #[must_use]
    pub fn new(stream: IntStreamHandle) -> Self {
        Self { stream }
    }

    /// The stream being written.
    #[must_use]
    pub fn stream(&self) -> IntStreamHandle {
        self.stream.clone()
    }

    fn push(&mut self, event: IntEvent) -> Result<()> {
        let mut stream = self.stream.borrow_mut();
        if stream.frozen {
            return Err(CasmError::WriteToFrozen);
        }
        stream.events.push(event);
        Ok(())
    }

    /// Append a value in the default varuint64 format.
    pub fn write(&mut self, value: IntValue) -> Result<()> {
        self.write_typed(value, IntFormat::Varuint64)
    }

    /// Append a value with an explicit wire format.
    pub fn write_typed(&mut self, value: IntValue, format: IntFormat) -> Result<()> {
        self.push(IntEvent::Value { value, format })
    }

    /// Append an abbreviation index.
    pub fn write_abbrev(&mut self, value: IntValue) -> Result<()> {
        self.push(IntEvent::Abbrev { value })
    }

    /// Append a header pair, carried out of band.
    pub fn write_header_value(&mut self, value: IntValue, format: IntFormat) -> Result<()> {
        let mut stream = self.stream.borrow_mut();
        if stream.frozen {
            return Err(CasmError::WriteToFrozen);
        }
        stream.header.push((value, format));
        Ok(())
    }

    /// Append a block-enter bracket.
    pub fn write_block_enter(&mut self) -> Result<()> {
        self.push(IntEvent::BlockEnter)
    }

    /// Append a block-exit bracket.
    pub fn write_block_exit(&mut self) -> Result<()> {
        self.push(IntEvent::BlockExit)
    }

    /// Append an octet-alignment event.
    pub fn write_align(&mut self) -> Result<()> {
        self.push(IntEvent::Align)
    }

    /// Freeze the stream; no further writes succeed.
    pub fn write_freeze_eof(&mut self) -> Result<()> {
        self.stream.borrow_mut().frozen = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// A reading position into an [`IntStream`].
#[derive(Debug)]
pub struct IntStreamReader {
    stream: IntStreamHandle,
    index: usize,
    header_index: usize,
    peek_stack: Vec<usize>,
    at_eof: bool,
}

impl IntStreamReader {
    /// Reader at the start of `stream`.
    #[must_use]
    pub fn new(stream: IntStreamHandle) -> Self {
        Self {
            stream,
            index: 0,
            header_index: 0,
            peek_stack: Vec::new(),
            at_eof: false,
        }
    }

    /// Current logical index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The stream being read.
    #[must_use]
    pub fn stream_handle(&self) -> IntStreamHandle {
        self.stream.clone()
    }

    /// Whether a read ran past the frozen end.
    #[must_use]
    pub fn hit_eof(&self) -> bool {
        self.at_eof
    }

    fn len(&self) -> usize {
        self.stream.borrow().len()
    }

    /// Next event without advancing.
    #[must_use]
    pub fn peek_event(&self) -> Option<IntEvent> {
        self.stream.borrow().event_at(self.index)
    }

    /// Next event, advancing past it.
    pub fn next_event(&mut self) -> Option<IntEvent> {
        let event = self.peek_event();
        if event.is_some() {
            self.index += 1;
        }
        event
    }

    /// Read the next value or abbreviation index.
    ///
    /// Past the frozen end this returns 0 and sets the EOF flag; hitting a
    /// block bracket is an internal error (the caller should have tested
    /// `at_eob`).
    pub fn read(&mut self) -> Result<IntValue> {
        match self.next_event() {
            Some(IntEvent::Value { value, .. } | IntEvent::Abbrev { value }) => Ok(value),
            Some(other) => Err(CasmError::internal(format!(
                "read integer hit stream marker {other:?}"
            ))),
            None => {
                self.at_eof = true;
                Ok(0)
            }
        }
    }

    /// Consume a block-enter bracket.
    pub fn open_block(&mut self) -> Result<()> {
        match self.next_event() {
            Some(IntEvent::BlockEnter) => Ok(()),
            other => Err(CasmError::internal(format!(
                "expected block enter, found {other:?}"
            ))),
        }
    }

    /// Consume a block-exit bracket.
    pub fn close_block(&mut self) -> Result<()> {
        match self.next_event() {
            Some(IntEvent::BlockExit) => Ok(()),
            other => Err(CasmError::internal(format!(
                "expected block exit, found {other:?}"
            ))),
        }
    }

    /// Whether the cursor sits at a block-exit bracket or the stream end.
    #[must_use]
    pub fn at_eob(&self) -> bool {
        matches!(self.peek_event(), Some(IntEvent::BlockExit) | None)
    }

    /// Whether the cursor is at the end of a frozen stream.
    #[must_use]
    pub fn at_eof(&self) -> bool {
        self.index >= self.len() && self.stream.borrow().is_frozen()
    }

    /// Whether every event has been consumed.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.index == self.len()
    }

    /// Read the next header pair, which must carry `format`.
    pub fn read_header_value(&mut self, format: IntFormat) -> Result<IntValue> {
        let stream = self.stream.borrow();
        let Some(&(value, actual)) = stream.header().get(self.header_index) else {
            return Err(CasmError::HeaderMismatch {
                expected: format.to_string(),
                actual: "end of header".to_owned(),
            });
        };
        if actual != format {
            return Err(CasmError::HeaderMismatch {
                expected: format.to_string(),
                actual: actual.to_string(),
            });
        }
        self.header_index += 1;
        Ok(value)
    }

    /// Save the current position.
    pub fn push_peek_pos(&mut self) {
        self.peek_stack.push(self.index);
    }

    /// Restore the most recently saved position.
    pub fn pop_peek_pos(&mut self) {
        if let Some(index) = self.peek_stack.pop() {
            self.index = index;
        }
    }

    /// Whether a bounded burst of reads can proceed without suspension.
    #[must_use]
    pub fn can_process_more_input_now(&self) -> bool {
        self.stream.borrow().is_frozen() || self.index + RESUME_HEADROOM_INTS <= self.len()
    }
}
