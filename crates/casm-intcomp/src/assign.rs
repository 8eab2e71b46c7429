//! Cutoff selection: choose the subsequences worth abbreviating and hand
//! out dense indices.
//!
//! Synthetic nodes take the first indices so their small values stay stable
//! across runs; surviving integer paths follow in weight order.

use casm_types::AbbrevIndex;
use tracing::debug;

use crate::count_node::{CountNodeId, CountTrie};

/// Tunables of the selection pass.
#[derive(Debug, Clone, Copy)]
pub struct CutoffParams {
    /// Minimum occurrence count to survive.
    pub count_cutoff: u64,
    /// Minimum weight to survive.
    pub weight_cutoff: u64,
    /// Cap on total assignments, synthetic nodes included.
    pub max_abbreviations: usize,
}

impl Default for CutoffParams {
    fn default() -> Self {
        Self {
            count_cutoff: casm_types::limits::DEFAULT_COUNT_CUTOFF,
            weight_cutoff: casm_types::limits::DEFAULT_WEIGHT_CUTOFF,
            max_abbreviations: casm_types::limits::DEFAULT_MAX_ABBREVIATIONS,
        }
    }
}

/// Number of synthetic assignments that always precede integer paths.
pub const SYNTHETIC_ASSIGNMENTS: usize = 5;

/// Prune the trie, rank the survivors, and assign dense abbreviation
/// indices starting at zero. Returns the assigned nodes in index order.
pub fn assign_abbreviations(trie: &mut CountTrie, params: &CutoffParams) -> Vec<CountNodeId> {
    trie.clear_abbrevs();
    trie.remove_small_usage_counts(params.count_cutoff);

    let mut survivors: Vec<CountNodeId> = trie
        .int_nodes()
        .into_iter()
        .filter(|&id| {
            let node = trie.node(id);
            node.count() >= params.count_cutoff
                && node.weight() >= params.weight_cutoff
                && node.weight() > 0
        })
        .collect();
    survivors.sort_by(|&a, &b| {
        let wa = trie.node(a).weight();
        let wb = trie.node(b).weight();
        wb.cmp(&wa).then_with(|| trie.path(a).cmp(&trie.path(b)))
    });
    let int_budget = params
        .max_abbreviations
        .saturating_sub(SYNTHETIC_ASSIGNMENTS);
    survivors.truncate(int_budget);

    let mut assignments = vec![
        trie.default_single(),
        trie.default_multiple(),
        trie.block_enter(),
        trie.block_exit(),
        trie.align(),
    ];
    assignments.extend(survivors);
    for (index, &id) in assignments.iter().enumerate() {
        trie.assign_abbrev(id, AbbrevIndex::new(index as u32));
    }
    debug!(
        "assigned {} abbreviations ({} integer paths)",
        assignments.len(),
        assignments.len() - SYNTHETIC_ASSIGNMENTS
    );
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_trie() -> CountTrie {
        let mut trie = CountTrie::new();
        let root = trie.root();
        // Path 10→20→30 occurs 3 times.
        let a = trie.get_or_create_child(root, 10);
        let b = trie.get_or_create_child(a, 20);
        let c = trie.get_or_create_child(b, 30);
        for _ in 0..3 {
            trie.increment(a);
            trie.increment(b);
            trie.increment(c);
        }
        // Path 40→50 occurs twice.
        let d = trie.get_or_create_child(root, 40);
        let e = trie.get_or_create_child(d, 50);
        for _ in 0..2 {
            trie.increment(d);
            trie.increment(e);
        }
        // A singleton below any cutoff.
        let f = trie.get_or_create_child(root, 99);
        trie.increment(f);
        trie
    }

    #[test]
    fn indices_are_dense_and_synthetic_first() {
        let mut trie = seeded_trie();
        let assignments = assign_abbreviations(
            &mut trie,
            &CutoffParams {
                count_cutoff: 2,
                weight_cutoff: 2,
                max_abbreviations: 4096,
            },
        );
        for (index, &id) in assignments.iter().enumerate() {
            assert_eq!(trie.node(id).abbrev().map(|a| a.get()), Some(index as u32));
        }
        assert_eq!(assignments[0], trie.default_single());
        assert_eq!(assignments[4], trie.align());
        // 10→20→30 (weight 6) outranks 10→20 (3), 40→50 (2).
        let first_int = assignments[SYNTHETIC_ASSIGNMENTS];
        assert_eq!(trie.path(first_int), vec![10, 20, 30]);
    }

    #[test]
    fn weight_cutoff_drops_light_paths() {
        let mut trie = seeded_trie();
        let assignments = assign_abbreviations(
            &mut trie,
            &CutoffParams {
                count_cutoff: 2,
                weight_cutoff: 4,
                max_abbreviations: 4096,
            },
        );
        // Only 10→20→30 (weight 6) survives the weight cutoff.
        assert_eq!(assignments.len(), SYNTHETIC_ASSIGNMENTS + 1);
    }

    #[test]
    fn max_abbreviations_caps_the_set() {
        let mut trie = seeded_trie();
        let assignments = assign_abbreviations(
            &mut trie,
            &CutoffParams {
                count_cutoff: 1,
                weight_cutoff: 1,
                max_abbreviations: SYNTHETIC_ASSIGNMENTS + 1,
            },
        );
        assert_eq!(assignments.len(), SYNTHETIC_ASSIGNMENTS + 1);
    }

    #[test]
    fn cutoff_prunes_unselected_counts() {
        let mut trie = seeded_trie();
        assign_abbreviations(
            &mut trie,
            &CutoffParams {
                count_cutoff: 2,
                weight_cutoff: 2,
                max_abbreviations: 4096,
            },
        );
        // The singleton path was pruned outright.
        assert_eq!(trie.lookup_child(trie.root(), 99), None);
    }
}
