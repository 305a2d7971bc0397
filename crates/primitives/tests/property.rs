//! Decoder robustness against arbitrary and mutated inputs.

use ledgerd_primitives::block::{Block, BlockHeader};
use ledgerd_primitives::outpoint::OutPoint;
use ledgerd_primitives::transaction::{Transaction, TxIn, TxOut};

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state >> 11
    }

    fn next_u8(&mut self) -> u8 {
        self.next_u64() as u8
    }

    fn below(&mut self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            (self.next_u64() % max as u64) as usize
        }
    }

    fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next_u8()).collect()
    }

    fn bytes_below(&mut self, max: usize) -> Vec<u8> {
        let len = self.below(max);
        self.bytes(len)
    }
}

fn random_block(rng: &mut Lcg) -> Block {
    let tx_count = 1 + rng.below(4);
    let transactions = (0..tx_count)
        .map(|_| Transaction {
            version: 1,
            vin: (0..1 + rng.below(3))
                .map(|_| TxIn {
                    prevout: OutPoint::new(
                        std::array::from_fn(|_| rng.next_u8()),
                        rng.below(8) as u32,
                    ),
                    script_sig: rng.bytes_below(80),
                    sequence: u32::MAX,
                })
                .collect(),
            vout: (0..1 + rng.below(3))
                .map(|_| TxOut {
                    value: rng.below(1_000_000) as i64,
                    script_pubkey: rng.bytes_below(40),
                })
                .collect(),
            lock_time: 0,
        })
        .collect();
    Block {
        header: BlockHeader {
            version: 2,
            prev_block: std::array::from_fn(|_| rng.next_u8()),
            merkle_root: std::array::from_fn(|_| rng.next_u8()),
            time: rng.next_u64() as u32,
            bits: 0x207f_ffff,
            nonce: rng.next_u64() as u32,
        },
        transactions,
    }
}

#[test]
fn random_bytes_never_panic() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..2_000 {
        let bytes = rng.bytes_below(400);
        let _ = Block::consensus_decode(&bytes);
        let _ = Transaction::consensus_decode(&bytes);
    }
}

#[test]
fn every_strict_prefix_is_rejected() {
    let mut rng = Lcg::new(42);
    for _ in 0..20 {
        let encoded = random_block(&mut rng).consensus_encode();
        for cut in 0..encoded.len() {
            assert!(
                Block::consensus_decode(&encoded[..cut]).is_err(),
                "prefix of length {cut} decoded"
            );
        }
    }
}

#[test]
fn single_byte_mutations_never_panic() {
    let mut rng = Lcg::new(7);
    for _ in 0..20 {
        let encoded = random_block(&mut rng).consensus_encode();
        for _ in 0..200 {
            let mut mutated = encoded.clone();
            let pos = rng.below(mutated.len());
            mutated[pos] ^= 1 << rng.below(8);
            if let Ok(block) = Block::consensus_decode(&mutated) {
                assert_eq!(block.consensus_encode(), mutated);
            }
        }
    }
}
