//! Structured usage report over a completed collect/assign pass.

use serde::Serialize;

use crate::count_node::{CountKind, CountTrie};

/// One reportable trie node.
#[derive(Debug, Serialize)]
pub struct UsageEntry {
    /// Node kind name.
    pub kind: &'static str,
    /// Integer path (empty for synthetic nodes).
    pub path: Vec<u64>,
    /// Occurrence count.
    pub count: u64,
    /// Ranking weight.
    pub weight: u64,
    /// Assigned abbreviation index, if selected.
    pub abbreviation: Option<u32>,
}

/// Usage summary emitted by `--report`.
#[derive(Debug, Serialize)]
pub struct UsageReport {
    /// Number of assigned abbreviations.
    pub abbreviation_count: usize,
    /// Per-node usage, assigned nodes first, by descending weight.
    pub entries: Vec<UsageEntry>,
}

/// Build the report for a trie after cutoff selection.
#[must_use]
pub fn build_report(trie: &CountTrie) -> UsageReport {
    let mut entries = Vec::new();
    for id in [
        trie.default_single(),
        trie.default_multiple(),
        trie.block_enter(),
        trie.block_exit(),
        trie.align(),
    ] {
        let node = trie.node(id);
        entries.push(UsageEntry {
            kind: node.kind().name(),
            path: Vec::new(),
            count: node.count(),
            weight: node.weight(),
            abbreviation: node.abbrev().map(|a| a.get()),
        });
    }
    for id in trie.int_nodes() {
        let node = trie.node(id);
        entries.push(UsageEntry {
            kind: CountKind::Int.name(),
            path: trie.path(id),
            count: node.count(),
            weight: node.weight(),
            abbreviation: node.abbrev().map(|a| a.get()),
        });
    }
    entries.sort_by(|a, b| {
        let assigned = |e: &UsageEntry| e.abbreviation.is_none();
        assigned(a)
            .cmp(&assigned(b))
            .then(b.weight.cmp(&a.weight))
            .then(a.path.cmp(&b.path))
    });
    let abbreviation_count = entries.iter().filter(|e| e.abbreviation.is_some()).count();
    UsageReport {
        abbreviation_count,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::{assign_abbreviations, CutoffParams, SYNTHETIC_ASSIGNMENTS};

    #[test]
    fn report_lists_assigned_first() {
        let mut trie = CountTrie::new();
        let root = trie.root();
        let a = trie.get_or_create_child(root, 1);
        let b = trie.get_or_create_child(a, 2);
        for _ in 0..3 {
            trie.increment(a);
            trie.increment(b);
        }
        assign_abbreviations(
            &mut trie,
            &CutoffParams {
                count_cutoff: 2,
                weight_cutoff: 2,
                max_abbreviations: 64,
            },
        );
        let report = build_report(&trie);
        assert_eq!(report.abbreviation_count, SYNTHETIC_ASSIGNMENTS + 1);
        assert!(report.entries[0].abbreviation.is_some());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"abbreviation_count\""));
    }
}
