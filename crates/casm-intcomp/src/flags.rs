//! Tunables of a compression run.

use casm_types::limits::{
    DEFAULT_COUNT_CUTOFF, DEFAULT_LENGTH_LIMIT, DEFAULT_MAX_ABBREVIATIONS, DEFAULT_WEIGHT_CUTOFF,
};
use casm_types::IntFormat;

use crate::assign::CutoffParams;
use crate::collect::CollectionFlags;

/// Everything the compressor driver can be told.
#[derive(Debug, Clone, Copy)]
pub struct CompressionFlags {
    /// Minimum occurrence count for a subsequence to survive cutoff.
    pub count_cutoff: u64,
    /// Minimum weight for a subsequence to survive cutoff.
    pub weight_cutoff: u64,
    /// Bound on tracked subsequence length.
    pub length_limit: usize,
    /// Cap on abbreviation assignments.
    pub max_abbreviations: usize,
    /// Emit minimized (true varuint) block size prefixes.
    pub minimize_block_size: bool,
    /// Express the decoder as overrides of the CISM host algorithm.
    pub use_cism_model: bool,
    /// Prefix-code the abbreviation indices.
    pub use_huffman: bool,
    /// Wire format of plain (non-Huffman) abbreviation indices.
    pub abbrev_format: IntFormat,
    /// What the collect phase gathers.
    pub collection: CollectionFlags,
}

impl Default for CompressionFlags {
    fn default() -> Self {
        Self {
            count_cutoff: DEFAULT_COUNT_CUTOFF,
            weight_cutoff: DEFAULT_WEIGHT_CUTOFF,
            length_limit: DEFAULT_LENGTH_LIMIT,
            max_abbreviations: DEFAULT_MAX_ABBREVIATIONS,
            minimize_block_size: false,
            use_cism_model: false,
            use_huffman: false,
            abbrev_format: IntFormat::Varuint64,
            collection: CollectionFlags::ALL,
        }
    }
}

impl CompressionFlags {
    /// The cutoff-selection view of these flags.
    #[must_use]
    pub fn cutoff_params(&self) -> CutoffParams {
        CutoffParams {
            count_cutoff: self.count_cutoff,
            weight_cutoff: self.weight_cutoff,
            max_abbreviations: self.max_abbreviations,
        }
    }
}
