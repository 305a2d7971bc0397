//! Per-block undo records.

use ledgerd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use ledgerd_primitives::outpoint::OutPoint;

use crate::ledger::UtxoEntry;

const BLOCK_UNDO_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpentOutput {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

/// Ledger entries a block consumed, in spending order. Outputs created and
/// spent inside the same block never reach the ledger and are not recorded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockUndo {
    pub spent: Vec<SpentOutput>,
}

impl BlockUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_u32_le(self.spent.len() as u32);
        for spent in &self.spent {
            spent.outpoint.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&spent.entry.encode());
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let spent_len = decoder.read_u32_le()? as usize;
        // Each record is at least an outpoint plus a length byte.
        if spent_len > decoder.remaining() / 37 {
            return Err(DecodeError::SizeTooLarge);
        }
        let mut spent = Vec::with_capacity(spent_len);
        for _ in 0..spent_len {
            let outpoint = OutPoint::consensus_decode(&mut decoder)?;
            let entry_bytes = decoder.read_var_bytes()?;
            let entry = UtxoEntry::decode(&entry_bytes)
                .map_err(|_| DecodeError::InvalidData("invalid utxo entry in undo"))?;
            spent.push(SpentOutput { outpoint, entry });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { spent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_restores_spending_order() {
        let undo = BlockUndo {
            spent: vec![
                SpentOutput {
                    outpoint: OutPoint::new([1u8; 32], 3),
                    entry: UtxoEntry {
                        value: 50,
                        script_pubkey: vec![0x51],
                        height: 7,
                        is_coinbase: true,
                    },
                },
                SpentOutput {
                    outpoint: OutPoint::new([2u8; 32], 0),
                    entry: UtxoEntry {
                        value: 9,
                        script_pubkey: Vec::new(),
                        height: 8,
                        is_coinbase: false,
                    },
                },
            ],
        };
        assert_eq!(BlockUndo::decode(&undo.encode()).expect("decode"), undo);
    }

    #[test]
    fn rejects_unknown_version_and_huge_counts() {
        assert!(BlockUndo::decode(&[9, 0, 0, 0, 0]).is_err());
        assert_eq!(
            BlockUndo::decode(&[BLOCK_UNDO_VERSION, 0xff, 0xff, 0xff, 0xff]),
            Err(DecodeError::SizeTooLarge)
        );
    }
}
