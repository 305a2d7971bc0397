//! Periodic difficulty retargeting.
//!
//! Every `retarget_interval` blocks the target is rescaled by the time the
//! previous interval actually took, clamped to a factor of four either way
//! and never easier than the network's pow limit.

use ledgerd_consensus::ConsensusParams;
use primitive_types::U256;

use crate::compact::{compact_to_u256, hash_to_u256, target_to_compact, u256_to_compact, CompactError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    /// Fewer headers than `retarget_window` asked for.
    MissingHistory,
    NonContiguous,
    Compact(CompactError),
}

impl std::fmt::Display for DifficultyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DifficultyError::MissingHistory => write!(f, "not enough headers to retarget"),
            DifficultyError::NonContiguous => write!(f, "header list must be contiguous by height"),
            DifficultyError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DifficultyError {}

impl From<CompactError> for DifficultyError {
    fn from(err: CompactError) -> Self {
        DifficultyError::Compact(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub height: i64,
    pub time: i64,
    pub bits: u32,
}

/// Number of most recent headers (ending at the parent) that
/// `next_work_required` needs to compute the bits of block `next_height`.
pub fn retarget_window(next_height: i64, params: &ConsensusParams) -> usize {
    let interval = params.retarget_interval();
    if next_height <= 0 {
        0
    } else if params.pow_no_retargeting || interval <= 0 || next_height % interval != 0 {
        1
    } else {
        interval as usize
    }
}

/// Required `bits` for the block after the last entry of `chain`.
///
/// `chain` is the tail of the parent's ancestry in height order, at least
/// `retarget_window` entries long. An empty chain means the next block is
/// the genesis block.
pub fn next_work_required(
    chain: &[HeaderInfo],
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let Some(last) = chain.last() else {
        return Ok(target_to_compact(&params.pow_limit));
    };
    ensure_contiguous(chain)?;

    let next_height = last.height + 1;
    let window = retarget_window(next_height, params);
    if window <= 1 {
        return Ok(last.bits);
    }
    if chain.len() < window {
        return Err(DifficultyError::MissingHistory);
    }

    let first = &chain[chain.len() - window];
    let actual_timespan = (last.time - first.time)
        .clamp(params.min_actual_timespan(), params.max_actual_timespan());

    let old_target = compact_to_u256(last.bits)?;
    let mut next = mul_div_u256(
        old_target,
        actual_timespan as u64,
        params.pow_target_timespan as u64,
    );
    let pow_limit = hash_to_u256(&params.pow_limit);
    if next > pow_limit {
        next = pow_limit;
    }

    Ok(u256_to_compact(next))
}

fn ensure_contiguous(chain: &[HeaderInfo]) -> Result<(), DifficultyError> {
    let base = chain[0].height;
    for (idx, header) in chain.iter().enumerate() {
        if header.height != base + idx as i64 {
            return Err(DifficultyError::NonContiguous);
        }
    }
    Ok(())
}

// floor(value * mul / div) without overflowing on large targets.
fn mul_div_u256(value: U256, mul: u64, div: u64) -> U256 {
    if div == 0 {
        return U256::max_value();
    }
    let div_u = U256::from(div);
    let quotient = value / div_u;
    let remainder = value - quotient * div_u;
    let (scaled, overflow) = quotient.overflowing_mul(U256::from(mul));
    if overflow {
        return U256::max_value();
    }
    scaled.saturating_add(remainder * U256::from(mul) / div_u)
}
