//! `nBits` compact encoding of 256-bit targets and the work they represent.

use std::cmp::Ordering;

use ledgerd_consensus::Hash256;
use primitive_types::U256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if mantissa != 0 && bits & 0x0080_0000 != 0 {
        return Err(CompactError::Negative);
    }
    if mantissa != 0
        && (size > 34 || (mantissa > 0xff && size > 33) || (mantissa > 0xffff && size > 32))
    {
        return Err(CompactError::Overflow);
    }

    Ok(if size <= 3 {
        U256::from(mantissa >> (8 * (3 - size)))
    } else {
        U256::from(mantissa) << (8 * (size - 3))
    })
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut mantissa = if size <= 3 {
        value.low_u32() << (8 * (3 - size))
    } else {
        (value >> (8 * (size - 3))).low_u32()
    };

    // Keep the sign bit clear by moving one byte into the exponent.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }

    (size << 24) | (mantissa & 0x007f_ffff)
}

pub fn u256_to_hash(value: U256) -> Hash256 {
    value.to_little_endian()
}

pub fn hash_to_u256(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    compact_to_u256(bits).map(u256_to_hash)
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(hash_to_u256(target))
}

pub fn hash_meets_target(hash: &Hash256, target: &Hash256) -> bool {
    hash_to_u256(hash) <= hash_to_u256(target)
}

/// Expected number of hashes to find a block at `bits`: 2^256 / (target + 1).
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    // 2^256 does not fit, so compute (~target / (target + 1)) + 1.
    let one = U256::one();
    Ok((!target / (target + one)) + one)
}

/// Numeric comparison of two little-endian 256-bit values.
pub fn cmp_le_u256(a: &Hash256, b: &Hash256) -> Ordering {
    hash_to_u256(a).cmp(&hash_to_u256(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_values() {
        assert_eq!(compact_to_u256(0x0100_0000), Ok(U256::zero()));
        assert_eq!(compact_to_u256(0x0112_3456), Ok(U256::from(0x12u64)));
        assert_eq!(compact_to_u256(0x0212_3456), Ok(U256::from(0x1234u64)));
        assert_eq!(compact_to_u256(0x0412_3456), Ok(U256::from(0x1234_5600u64)));
        assert_eq!(compact_to_u256(0x0492_3456), Err(CompactError::Negative));
        assert_eq!(compact_to_u256(0xff12_3456), Err(CompactError::Overflow));
    }

    #[test]
    fn encoding_is_normalized() {
        assert_eq!(u256_to_compact(U256::from(0x80u64)), 0x0200_8000);
        assert_eq!(u256_to_compact(U256::from(0x1234_5600u64)), 0x0412_3456);
        assert_eq!(u256_to_compact(U256::zero()), 0);
    }

    #[test]
    fn proof_grows_as_target_shrinks() {
        let easy = block_proof(0x207f_ffff).expect("easy");
        let hard = block_proof(0x1d00_ffff).expect("hard");
        assert_eq!(easy, U256::from(2u64));
        assert!(hard > easy);
        assert_eq!(hard, U256::from(0x1_0001_0001u64));
        assert_eq!(block_proof(0), Ok(U256::zero()));
    }
}
