use ledgerd_consensus::Hash256;
use ledgerd_primitives::block::{Block, BlockDecodeError, BlockHeader, HEADER_SIZE};
use ledgerd_primitives::encoding::DecodeError;
use ledgerd_primitives::outpoint::OutPoint;
use ledgerd_primitives::transaction::{Transaction, TransactionDecodeError, TxIn, TxOut};

fn seq_hash(start: u8) -> Hash256 {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

fn push_seq(buffer: &mut Vec<u8>, start: u8) {
    buffer.extend_from_slice(&seq_hash(start));
}

fn sample_header() -> BlockHeader {
    BlockHeader {
        version: 2,
        prev_block: seq_hash(0x00),
        merkle_root: seq_hash(0x20),
        time: 0x0102_0304,
        bits: 0x1d00_ffff,
        nonce: 0x0a0b_0c0d,
    }
}

fn sample_tx() -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::new(seq_hash(0x40), 1),
            script_sig: vec![0xaa, 0xbb],
            sequence: 0xffff_fffe,
        }],
        vout: vec![TxOut {
            value: 50_000,
            script_pubkey: vec![0x51],
        }],
        lock_time: 7,
    }
}

#[test]
fn header_layout() {
    let header = sample_header();
    let encoded = header.consensus_encode();

    let mut expected = Vec::new();
    expected.extend_from_slice(&2i32.to_le_bytes());
    push_seq(&mut expected, 0x00);
    push_seq(&mut expected, 0x20);
    expected.extend_from_slice(&0x0102_0304u32.to_le_bytes());
    expected.extend_from_slice(&0x1d00_ffffu32.to_le_bytes());
    expected.extend_from_slice(&0x0a0b_0c0du32.to_le_bytes());

    assert_eq!(encoded.len(), HEADER_SIZE);
    assert_eq!(encoded, expected);
    assert_eq!(
        BlockHeader::consensus_decode(&encoded).expect("decode header"),
        header
    );
}

#[test]
fn transaction_layout() {
    let tx = sample_tx();
    let encoded = tx.consensus_encode();

    let mut expected = Vec::new();
    expected.extend_from_slice(&1i32.to_le_bytes());
    expected.push(1);
    push_seq(&mut expected, 0x40);
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&[2, 0xaa, 0xbb]);
    expected.extend_from_slice(&0xffff_fffeu32.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&50_000i64.to_le_bytes());
    expected.extend_from_slice(&[1, 0x51]);
    expected.extend_from_slice(&7u32.to_le_bytes());

    assert_eq!(encoded, expected);
    assert_eq!(Transaction::consensus_decode(&encoded).expect("decode tx"), tx);
}

#[test]
fn block_decodes_what_it_encodes() {
    let block = Block {
        header: sample_header(),
        transactions: vec![sample_tx(), sample_tx()],
    };
    let encoded = block.consensus_encode();
    let decoded = Block::consensus_decode(&encoded).expect("decode block");
    assert_eq!(decoded, block);
    assert_eq!(decoded.hash(), block.header.hash());
    assert_eq!(decoded.txids().len(), 2);
}

#[test]
fn empty_transaction_list_is_well_formed() {
    let block = Block {
        header: sample_header(),
        transactions: Vec::new(),
    };
    let decoded = Block::consensus_decode(&block.consensus_encode()).expect("decode");
    assert!(decoded.transactions.is_empty());
}

#[test]
fn truncated_block_is_malformed() {
    let block = Block {
        header: sample_header(),
        transactions: vec![sample_tx()],
    };
    let encoded = block.consensus_encode();
    let err = Block::consensus_decode(&encoded[..encoded.len() - 1]).expect_err("truncated");
    assert_eq!(
        err,
        BlockDecodeError::Transaction(TransactionDecodeError::Decode(DecodeError::UnexpectedEof))
    );
}

#[test]
fn trailing_bytes_are_malformed() {
    let block = Block {
        header: sample_header(),
        transactions: vec![sample_tx()],
    };
    let mut encoded = block.consensus_encode();
    encoded.push(0);
    assert_eq!(
        Block::consensus_decode(&encoded),
        Err(BlockDecodeError::Decode(DecodeError::TrailingBytes))
    );
}

#[test]
fn tx_count_beyond_input_is_malformed() {
    let mut encoded = sample_header().consensus_encode();
    encoded.push(0xfd);
    encoded.extend_from_slice(&0x1000u16.to_le_bytes());
    assert_eq!(
        Block::consensus_decode(&encoded),
        Err(BlockDecodeError::Decode(DecodeError::SizeTooLarge))
    );
}

#[test]
fn txid_is_double_sha_of_encoding() {
    let tx = sample_tx();
    assert_eq!(
        tx.txid(),
        ledgerd_primitives::sha256d(&tx.consensus_encode())
    );
}
