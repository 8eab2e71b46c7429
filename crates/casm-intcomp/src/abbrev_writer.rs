//! Injects abbreviation indices into the outgoing integer stream.
//!
//! Values buffer up to the maximum abbreviation length, then leave through
//! a longest-prefix match against the count trie: the deepest visited node
//! holding an index wins; anything unmatched joins a pending default run,
//! flushed as a single- or multi-value default block before the next
//! abbreviation goes out.

use std::collections::VecDeque;

use casm_error::{CasmError, Result};
use casm_stream::{IntEvent, IntStreamHandle, IntStreamReader, IntStreamWriter};
use casm_types::{AbbrevIndex, IntFormat, IntValue};

use crate::count_node::{CountNodeId, CountTrie};

/// Wire format of a default-run value.
const DEFAULT_FORMAT: IntFormat = IntFormat::Varint64;
/// Wire format of a multi-default run length.
const LOOP_SIZE_FORMAT: IntFormat = IntFormat::Varuint64;

/// Streams values through the windowed longest-prefix matcher.
#[derive(Debug)]
pub struct AbbrevAssignWriter<'t> {
    trie: &'t CountTrie,
    writer: IntStreamWriter,
    buffer: VecDeque<IntValue>,
    max_abbrev_length: usize,
    default_values: Vec<IntValue>,
    /// Emit a trailing align abbreviation before freeze (prefix-coded
    /// payloads need the explicit terminator).
    align_at_eof: bool,
}

impl<'t> AbbrevAssignWriter<'t> {
    /// New writer forwarding into `writer`.
    pub fn new(trie: &'t CountTrie, writer: IntStreamWriter, max_abbrev_length: usize) -> Self {
        Self {
            trie,
            writer,
            buffer: VecDeque::with_capacity(max_abbrev_length.max(1)),
            max_abbrev_length: max_abbrev_length.max(1),
            default_values: Vec::new(),
            align_at_eof: false,
        }
    }

    /// Terminate the payload with the align abbreviation at freeze.
    #[must_use]
    pub fn with_align_at_eof(mut self, enable: bool) -> Self {
        self.align_at_eof = enable;
        self
    }

    fn abbrev_of(&self, id: CountNodeId) -> Result<AbbrevIndex> {
        self.trie
            .node(id)
            .abbrev()
            .ok_or(CasmError::MissingAbbrevIndex)
    }

    fn forward_abbrev_value(&mut self, index: AbbrevIndex) -> Result<()> {
        self.flush_default_values()?;
        self.writer.write_abbrev(index.as_value())
    }

    fn forward_other_value(&mut self, value: IntValue) {
        self.default_values.push(value);
    }

    /// Buffer one value; a full buffer forces a match.
    pub fn write_value(&mut self, value: IntValue) -> Result<()> {
        debug_assert!(self.buffer.len() < self.max_abbrev_length);
        self.buffer.push_back(value);
        if self.buffer.len() == self.max_abbrev_length {
            self.write_from_buffer()?;
        }
        Ok(())
    }

    /// Longest-prefix match: walk the trie along the buffer, remember the
    /// deepest node with an index, emit it (or one default value).
    fn write_from_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut node: Option<CountNodeId> = None;
        let mut max: Option<CountNodeId> = None;
        for &value in &self.buffer {
            let next = match node {
                None => self.trie.lookup_child(self.trie.root(), value),
                Some(id) => self.trie.lookup_child(id, value),
            };
            let Some(next) = next else {
                break;
            };
            if self.trie.node(next).has_abbrev() {
                max = Some(next);
            }
            node = Some(next);
        }
        match max {
            None => {
                // Default to writing at least one value.
                let value = self.buffer[0];
                self.forward_other_value(value);
                self.pop_values_from_buffer(1);
            }
            Some(id) => {
                let index = self.abbrev_of(id)?;
                let len = self.trie.node(id).path_len() as usize;
                self.forward_abbrev_value(index)?;
                self.pop_values_from_buffer(len);
            }
        }
        Ok(())
    }

    fn write_until_buffer_empty(&mut self) -> Result<()> {
        while !self.buffer.is_empty() {
            self.write_from_buffer()?;
        }
        Ok(())
    }

    fn pop_values_from_buffer(&mut self, count: usize) {
        for _ in 0..count {
            if self.buffer.pop_front().is_none() {
                return;
            }
        }
    }

    /// Flush the pending default run as a single- or multi-default block.
    fn flush_default_values(&mut self) -> Result<()> {
        if self.default_values.is_empty() {
            return Ok(());
        }
        if self.default_values.len() == 1 {
            let index = self.abbrev_of(self.trie.default_single())?;
            self.writer.write_abbrev(index.as_value())?;
            self.writer
                .write_typed(self.default_values[0], DEFAULT_FORMAT)?;
            self.default_values.clear();
            return Ok(());
        }
        let index = self.abbrev_of(self.trie.default_multiple())?;
        self.writer.write_abbrev(index.as_value())?;
        self.writer
            .write_typed(self.default_values.len() as u64, LOOP_SIZE_FORMAT)?;
        let values = std::mem::take(&mut self.default_values);
        for value in values {
            self.writer.write_typed(value, DEFAULT_FORMAT)?;
        }
        Ok(())
    }

    /// Block and align events: drain pending state, then substitute the
    /// synthetic abbreviation (align events only flush — the alignment is
    /// reintroduced by the terminator or the module writer).
    pub fn write_block_enter(&mut self) -> Result<()> {
        self.write_until_buffer_empty()?;
        self.flush_default_values()?;
        let index = self.abbrev_of(self.trie.block_enter())?;
        self.forward_abbrev_value(index)
    }

    /// Block-exit counterpart of [`Self::write_block_enter`].
    pub fn write_block_exit(&mut self) -> Result<()> {
        self.write_until_buffer_empty()?;
        self.flush_default_values()?;
        let index = self.abbrev_of(self.trie.block_exit())?;
        self.forward_abbrev_value(index)
    }

    /// Align events act as flush points only.
    pub fn write_align(&mut self) -> Result<()> {
        self.write_until_buffer_empty()?;
        self.flush_default_values()
    }

    /// Drain everything and freeze downstream.
    pub fn write_freeze_eof(&mut self) -> Result<()> {
        self.write_until_buffer_empty()?;
        self.flush_default_values()?;
        if self.align_at_eof {
            let index = self.abbrev_of(self.trie.align())?;
            self.forward_abbrev_value(index)?;
        }
        self.writer.write_freeze_eof()
    }

    /// Pump a frozen raw stream through the matcher.
    pub fn run(&mut self, raw: IntStreamHandle) -> Result<()> {
        let mut reader = IntStreamReader::new(raw);
        while let Some(event) = reader.next_event() {
            match event {
                IntEvent::Value { value, .. } | IntEvent::Abbrev { value } => {
                    self.write_value(value)?;
                }
                IntEvent::BlockEnter => self.write_block_enter()?,
                IntEvent::BlockExit => self.write_block_exit()?,
                IntEvent::Align => self.write_align()?,
            }
        }
        self.write_freeze_eof()
    }
}
