//! Tunable limits and fixed margins of the compression pipeline.

/// Size in bytes of one backing page of a byte queue.
pub const PAGE_SIZE: usize = 4096;

/// Byte margin a pull-mode byte reader must have ahead of its cursor
/// before the interpreter commits to a bounded burst of primitive reads.
pub const RESUME_HEADROOM_BYTES: usize = 100;

/// Integer-count margin for pull-mode integer readers.
pub const RESUME_HEADROOM_INTS: usize = 100;

/// Wire width of a fixed-mode block size prefix (padded varuint32).
pub const FIXED_BLOCK_SIZE_BYTES: usize = 5;

/// Largest section name the driver expects; names beyond this still work
/// but force a reallocation.
pub const MAX_EXPECTED_SECTION_NAME_SIZE: usize = 32;

/// Initial capacity reserved for interpreter stacks.
pub const DEFAULT_STACK_SIZE: usize = 256;

/// Default minimum occurrence count for a subsequence to survive cutoff.
pub const DEFAULT_COUNT_CUTOFF: u64 = 2;

/// Default minimum weight for a subsequence to survive cutoff.
pub const DEFAULT_WEIGHT_CUTOFF: u64 = 2;

/// Default bound on tracked subsequence length.
pub const DEFAULT_LENGTH_LIMIT: usize = 5;

/// Default cap on the number of abbreviation assignments.
pub const DEFAULT_MAX_ABBREVIATIONS: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headroom_fits_within_a_page() {
        assert!(RESUME_HEADROOM_BYTES < PAGE_SIZE);
    }

    #[test]
    fn fixed_prefix_holds_any_u32() {
        // 32 bits / 7 bits-per-byte rounds up to 5 bytes.
        assert_eq!(FIXED_BLOCK_SIZE_BYTES, (32 + 6) / 7);
    }
}
