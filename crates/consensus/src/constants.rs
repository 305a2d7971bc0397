//! Consensus-wide constants shared across validation.

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 2_000_000;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = MAX_BLOCK_SIZE / 100;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Blocks may not be timestamped further than this ahead of the local clock.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;
/// Number of previous blocks whose median time bounds a new block's timestamp.
pub const MEDIAN_TIME_SPAN: usize = 11;
/// Lock times below this are block heights, above are unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Maximum number of non-push operations evaluated per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;
/// Maximum size of a single stack element.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Maximum combined depth of the main and alt stacks.
pub const MAX_STACK_SIZE: usize = 1_000;
/// Maximum number of public keys in one CHECKMULTISIG.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Coinbase scriptSig length bounds.
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;
