//! Consensus-wide constants shared across validation.

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 1_000_000;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = MAX_BLOCK_SIZE / 50;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Lock times below this are block heights, at or above it unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Use GetMedianTimePast() instead of nTime for end point timestamp.
pub const LOCKTIME_MEDIAN_TIME_PAST: u32 = 1 << 1;

/// Input sequence that disables lock time and replacement.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
/// Highest sequence number that still signals opt-in replacement.
pub const MAX_BIP125_RBF_SEQUENCE: u32 = 0xffff_fffd;

/// Version prefix a pre-fork block must carry for its bits to count as signals.
pub const VERSIONBITS_TOP_BITS: i32 = 0x2000_0000;
pub const VERSIONBITS_TOP_MASK: i32 = 0xE000_0000_u32 as i32;

/// Median time past window.
pub const MEDIAN_TIME_SPAN: usize = 11;
