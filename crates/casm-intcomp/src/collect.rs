//! Collect phase: streaming subsequence counting.
//!
//! Every value appended to the window bumps the trie node of each window
//! suffix ending at it; block and align events bump their synthetic nodes
//! and reset the window, since an abbreviation never spans a bracket.

use std::collections::VecDeque;

use casm_stream::{IntEvent, IntStreamHandle, IntStreamReader};
use casm_types::IntValue;

use crate::count_node::CountTrie;

/// What the collect phase gathers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionFlags {
    /// Count single values.
    pub top_level: bool,
    /// Count integer subsequences of length two and up.
    pub int_paths: bool,
}

impl CollectionFlags {
    /// Count everything.
    pub const ALL: Self = Self {
        top_level: true,
        int_paths: true,
    };
}

impl Default for CollectionFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// Windowed counter feeding a [`CountTrie`].
#[derive(Debug)]
pub struct Collector<'t> {
    trie: &'t mut CountTrie,
    window: VecDeque<IntValue>,
    length_limit: usize,
    flags: CollectionFlags,
}

impl<'t> Collector<'t> {
    /// New collector with the given path length bound.
    pub fn new(trie: &'t mut CountTrie, length_limit: usize, flags: CollectionFlags) -> Self {
        Self {
            trie,
            window: VecDeque::with_capacity(length_limit),
            length_limit: length_limit.max(1),
            flags,
        }
    }

    /// Append one value and count the window suffixes ending at it.
    pub fn add_value(&mut self, value: IntValue) {
        self.window.push_back(value);
        if self.window.len() > self.length_limit {
            self.window.pop_front();
        }
        for start in 0..self.window.len() {
            let suffix_len = self.window.len() - start;
            if suffix_len == 1 && !self.flags.top_level {
                continue;
            }
            if suffix_len > 1 && !self.flags.int_paths {
                continue;
            }
            let mut node = self.trie.root();
            for index in start..self.window.len() {
                node = self.trie.get_or_create_child(node, self.window[index]);
            }
            self.trie.increment(node);
        }
    }

    /// Record a block-enter event; the window never spans it.
    pub fn add_block_enter(&mut self) {
        let id = self.trie.block_enter();
        self.trie.increment(id);
        self.window.clear();
    }

    /// Record a block-exit event.
    pub fn add_block_exit(&mut self) {
        let id = self.trie.block_exit();
        self.trie.increment(id);
        self.window.clear();
    }

    /// Record an align event.
    pub fn add_align(&mut self) {
        let id = self.trie.align();
        self.trie.increment(id);
        self.window.clear();
    }
}

/// Run the collect phase over a frozen integer stream.
pub fn collect_stream(
    trie: &mut CountTrie,
    stream: IntStreamHandle,
    length_limit: usize,
    flags: CollectionFlags,
) {
    let mut collector = Collector::new(trie, length_limit, flags);
    let mut reader = IntStreamReader::new(stream);
    while let Some(event) = reader.next_event() {
        match event {
            IntEvent::Value { value, .. } | IntEvent::Abbrev { value } => {
                collector.add_value(value);
            }
            IntEvent::BlockEnter => collector.add_block_enter(),
            IntEvent::BlockExit => collector.add_block_exit(),
            IntEvent::Align => collector.add_align(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casm_stream::{IntStream, IntStreamWriter};

    #[test]
    fn repeated_triple_counts_three() {
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream.clone());
        for _ in 0..3 {
            for v in [10, 20, 30] {
                writer.write(v).unwrap();
            }
        }
        writer.write_freeze_eof().unwrap();

        let mut trie = CountTrie::new();
        collect_stream(&mut trie, stream, 3, CollectionFlags::ALL);

        let root = trie.root();
        let a = trie.lookup_child(root, 10).unwrap();
        let b = trie.lookup_child(a, 20).unwrap();
        let c = trie.lookup_child(b, 30).unwrap();
        assert_eq!(trie.node(c).count(), 3);
        assert_eq!(trie.node(c).weight(), 6);
        assert_eq!(trie.node(a).count(), 3);
    }

    #[test]
    fn brackets_reset_the_window() {
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream.clone());
        writer.write(1).unwrap();
        writer.write_block_enter().unwrap();
        writer.write(2).unwrap();
        writer.write_block_exit().unwrap();
        writer.write_freeze_eof().unwrap();

        let mut trie = CountTrie::new();
        collect_stream(&mut trie, stream, 4, CollectionFlags::ALL);

        // The pair 1→2 spans a bracket and must not be counted.
        let root = trie.root();
        let one = trie.lookup_child(root, 1).unwrap();
        assert_eq!(trie.lookup_child(one, 2), None);
        assert_eq!(trie.node(trie.block_enter()).count(), 1);
        assert_eq!(trie.node(trie.block_exit()).count(), 1);
    }

    #[test]
    fn length_limit_bounds_paths() {
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream.clone());
        for v in [1, 2, 3, 4, 5] {
            writer.write(v).unwrap();
        }
        writer.write_freeze_eof().unwrap();

        let mut trie = CountTrie::new();
        collect_stream(&mut trie, stream, 2, CollectionFlags::ALL);
        for id in trie.int_nodes() {
            assert!(trie.node(id).path_len() <= 2);
        }
    }

    #[test]
    fn top_level_only_skips_pairs() {
        let stream = IntStream::new().into_handle();
        let mut writer = IntStreamWriter::new(stream.clone());
        for v in [7, 8, 7, 8] {
            writer.write(v).unwrap();
        }
        writer.write_freeze_eof().unwrap();

        let mut trie = CountTrie::new();
        collect_stream(
            &mut trie,
            stream,
            3,
            CollectionFlags {
                top_level: true,
                int_paths: false,
            },
        );
        let root = trie.root();
        let seven = trie.lookup_child(root, 7).unwrap();
        assert_eq!(trie.node(seven).count(), 2);
        assert_eq!(trie.lookup_child(seven, 8), None);
    }
}
