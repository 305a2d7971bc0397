//! Header proof-of-work checks.

use ledgerd_consensus::ConsensusParams;
use ledgerd_primitives::block::BlockHeader;

use crate::compact::{compact_to_u256, hash_to_u256, CompactError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowError {
    InvalidBits(&'static str),
    UnexpectedBits { expected: u32, actual: u32 },
    HashMismatch,
    Compact(CompactError),
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::InvalidBits(message) => write!(f, "{message}"),
            PowError::UnexpectedBits { expected, actual } => {
                write!(f, "bits {actual:#010x} differ from required {expected:#010x}")
            }
            PowError::HashMismatch => write!(f, "block hash does not meet target"),
            PowError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

impl PowError {
    /// Short machine-readable reject code.
    pub fn code(&self) -> &'static str {
        match self {
            PowError::InvalidBits(_) | PowError::Compact(_) => "bad-bits",
            PowError::UnexpectedBits { .. } => "bad-diffbits",
            PowError::HashMismatch => "high-hash",
        }
    }
}

/// Checks that `header.bits` decodes to a usable target within the pow limit
/// and that the header hash meets it.
pub fn validate_pow_header(header: &BlockHeader, params: &ConsensusParams) -> Result<(), PowError> {
    let target = compact_to_u256(header.bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidBits("pow target is zero"));
    }
    if target > hash_to_u256(&params.pow_limit) {
        return Err(PowError::InvalidBits("pow target above limit"));
    }
    if hash_to_u256(&header.hash()) > target {
        return Err(PowError::HashMismatch);
    }
    Ok(())
}

/// Full contextual check: `bits` must equal the retarget result, then the
/// hash must meet it.
pub fn validate_pow_contextual(
    header: &BlockHeader,
    expected_bits: u32,
    params: &ConsensusParams,
) -> Result<(), PowError> {
    if header.bits != expected_bits {
        return Err(PowError::UnexpectedBits {
            expected: expected_bits,
            actual: header.bits,
        });
    }
    validate_pow_header(header, params)
}
