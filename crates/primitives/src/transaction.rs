//! Transaction types and serialization.

use ledgerd_consensus::Hash256;

use crate::encoding::{
    read_list, write_list, Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use crate::hash::sha256d;
use crate::outpoint::{OutPoint, OUTPOINT_SIZE};

// prevout + empty script + sequence
const MIN_TXIN_SIZE: usize = OUTPOINT_SIZE + 1 + 4;
// value + empty script
const MIN_TXOUT_SIZE: usize = 8 + 1;

pub const SEQUENCE_FINAL: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// A coinbase has exactly one input and it spends the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_into(&mut encoder);
        encoder.into_inner()
    }

    pub fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        write_list(encoder, &self.vin);
        write_list(encoder, &self.vout);
        encoder.write_u32_le(self.lock_time);
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }

    /// Sum of output values, or `None` on overflow.
    pub fn value_out(&self) -> Option<i64> {
        self.vout
            .iter()
            .try_fold(0i64, |total, output| total.checked_add(output.value))
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, TransactionDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(TransactionDecodeError::Decode(DecodeError::TrailingBytes));
        }
        Ok(tx)
    }

    pub fn decode_from(decoder: &mut Decoder) -> Result<Self, TransactionDecodeError> {
        let version = decoder.read_i32_le()?;
        let vin: Vec<TxIn> = read_list(decoder, MIN_TXIN_SIZE)?;
        if vin.is_empty() {
            return Err(TransactionDecodeError::InvalidTransactionFormat(
                "transaction has no inputs",
            ));
        }
        let vout: Vec<TxOut> = read_list(decoder, MIN_TXOUT_SIZE)?;
        if vout.is_empty() {
            return Err(TransactionDecodeError::InvalidTransactionFormat(
                "transaction has no outputs",
            ));
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionDecodeError {
    Decode(DecodeError),
    InvalidTransactionFormat(&'static str),
}

impl From<DecodeError> for TransactionDecodeError {
    fn from(error: DecodeError) -> Self {
        TransactionDecodeError::Decode(error)
    }
}

impl std::fmt::Display for TransactionDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionDecodeError::Decode(error) => write!(f, "{error}"),
            TransactionDecodeError::InvalidTransactionFormat(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for TransactionDecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::new([7u8; 32], 3),
                script_sig: vec![0x51],
                sequence: SEQUENCE_FINAL,
            }],
            vout: vec![TxOut {
                value: 5_000,
                script_pubkey: vec![0x76, 0xa9],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn coinbase_detection() {
        let mut tx = sample();
        assert!(!tx.is_coinbase());
        tx.vin[0].prevout = OutPoint::null();
        assert!(tx.is_coinbase());
        tx.vin.push(tx.vin[0].clone());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn value_out_overflow_is_none() {
        let mut tx = sample();
        tx.vout.push(TxOut {
            value: i64::MAX,
            script_pubkey: Vec::new(),
        });
        assert_eq!(tx.value_out(), None);
    }

    #[test]
    fn empty_lists_are_malformed() {
        let mut tx = sample();
        tx.vout.clear();
        assert_eq!(
            Transaction::consensus_decode(&tx.consensus_encode()),
            Err(TransactionDecodeError::InvalidTransactionFormat(
                "transaction has no outputs"
            ))
        );
        let mut tx = sample();
        tx.vin.clear();
        assert_eq!(
            Transaction::consensus_decode(&tx.consensus_encode()),
            Err(TransactionDecodeError::InvalidTransactionFormat(
                "transaction has no inputs"
            ))
        );
    }
}
