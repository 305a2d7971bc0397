use ledgerd_consensus::params::{consensus_params, Network};
use ledgerd_pow::compact::{compact_to_target, hash_meets_target, target_to_compact};
use ledgerd_pow::validation::{validate_pow_contextual, validate_pow_header, PowError};
use ledgerd_primitives::block::BlockHeader;

#[test]
fn compact_to_target_roundtrip() {
    let bits = 0x1d00ffff;
    let target = compact_to_target(bits).expect("target");
    assert_eq!(target_to_compact(&target), bits);
}

#[test]
fn compact_target_layout() {
    let target = compact_to_target(0x207fffff).expect("target");
    assert!(target[..29].iter().all(|b| *b == 0));
    assert_eq!(target[29], 0xff);
    assert_eq!(target[30], 0xff);
    assert_eq!(target[31], 0x7f);
}

#[test]
fn hash_meets_target_cmp() {
    let target = [0x10u8; 32];
    assert!(hash_meets_target(&[0x00u8; 32], &target));
    assert!(hash_meets_target(&target, &target));
    assert!(!hash_meets_target(&[0xffu8; 32], &target));
}

fn mine(mut header: BlockHeader) -> BlockHeader {
    let target = compact_to_target(header.bits).expect("target");
    while !hash_meets_target(&header.hash(), &target) {
        header.nonce += 1;
    }
    header
}

fn regtest_header() -> BlockHeader {
    BlockHeader {
        version: 2,
        prev_block: [1u8; 32],
        merkle_root: [2u8; 32],
        time: 1_600_000_000,
        bits: 0x207fffff,
        nonce: 0,
    }
}

#[test]
fn mined_header_passes() {
    let params = consensus_params(Network::Regtest);
    let header = mine(regtest_header());
    assert_eq!(validate_pow_header(&header, &params), Ok(()));
    assert_eq!(
        validate_pow_contextual(&header, 0x207fffff, &params),
        Ok(())
    );
}

#[test]
fn wrong_bits_are_rejected_before_hashing() {
    let params = consensus_params(Network::Regtest);
    let header = mine(regtest_header());
    let err = validate_pow_contextual(&header, 0x1d00ffff, &params).expect_err("bits");
    assert_eq!(err.code(), "bad-diffbits");
}

#[test]
fn target_above_limit_is_rejected() {
    let params = consensus_params(Network::Mainnet);
    let header = regtest_header();
    assert_eq!(
        validate_pow_header(&header, &params),
        Err(PowError::InvalidBits("pow target above limit"))
    );
}

#[test]
fn unmet_target_is_high_hash() {
    let params = consensus_params(Network::Regtest);
    let mut header = regtest_header();
    header.bits = 0x0300_0001;
    let err = validate_pow_header(&header, &params).expect_err("hash too high");
    assert_eq!(err, PowError::HashMismatch);
}
