//! Legacy signature hashing for transparent inputs.

use ledgerd_consensus::Hash256;
use ledgerd_primitives::encoding::{Encodable, Encoder};
use ledgerd_primitives::hash::sha256d;
use ledgerd_primitives::Transaction;

use crate::opcodes::OP_CODESEPARATOR;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }

    pub fn is_defined(self) -> bool {
        let base = self.0 & !SIGHASH_ANYONECANPAY;
        (SIGHASH_ALL..=SIGHASH_SINGLE).contains(&base)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SighashError {
    InputIndexOutOfRange,
    MissingOutput,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
            SighashError::MissingOutput => write!(f, "no matching output for SIGHASH_SINGLE"),
        }
    }
}

impl std::error::Error for SighashError {}

/// Digest committed to by a signature on `tx.vin[input_index]`.
///
/// Other inputs are serialized with empty scripts; `OP_CODESEPARATOR` is
/// stripped from `script_code`. `SIGHASH_SINGLE` without a matching output
/// is an error rather than the historical "one" digest.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }
    let hash_single = sighash_type.base_type() == SIGHASH_SINGLE;
    let hash_none = sighash_type.base_type() == SIGHASH_NONE;
    if hash_single && input_index >= tx.vout.len() {
        return Err(SighashError::MissingOutput);
    }
    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    let script_code = strip_code_separators(script_code);

    let mut encoder = Encoder::with_capacity(tx.serialized_size() + script_code.len() + 4);
    encoder.write_i32_le(tx.version);

    if anyone_can_pay {
        encoder.write_compact_size(1);
        let input = &tx.vin[input_index];
        input.prevout.consensus_encode(&mut encoder);
        encoder.write_var_bytes(&script_code);
        encoder.write_u32_le(input.sequence);
    } else {
        encoder.write_compact_size(tx.vin.len() as u64);
        for (idx, input) in tx.vin.iter().enumerate() {
            input.prevout.consensus_encode(&mut encoder);
            let is_signing = idx == input_index;
            if is_signing {
                encoder.write_var_bytes(&script_code);
            } else {
                encoder.write_compact_size(0);
            }
            if !is_signing && (hash_single || hash_none) {
                encoder.write_u32_le(0);
            } else {
                encoder.write_u32_le(input.sequence);
            }
        }
    }

    let output_count = if hash_none {
        0
    } else if hash_single {
        input_index + 1
    } else {
        tx.vout.len()
    };
    encoder.write_compact_size(output_count as u64);
    for (idx, output) in tx.vout.iter().take(output_count).enumerate() {
        if hash_single && idx != input_index {
            encoder.write_i64_le(-1);
            encoder.write_compact_size(0);
        } else {
            output.consensus_encode(&mut encoder);
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);
    Ok(sha256d(&encoder.into_inner()))
}

fn strip_code_separators(script: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(script.len());
    let mut cursor = 0usize;
    while cursor < script.len() {
        let start = cursor;
        let opcode = script[cursor];
        cursor += 1;
        let push_len = match opcode {
            0x01..=0x4b => opcode as usize,
            0x4c => script.get(cursor).map(|b| 1 + *b as usize).unwrap_or(0),
            0x4d => script
                .get(cursor..cursor + 2)
                .map(|b| 2 + u16::from_le_bytes([b[0], b[1]]) as usize)
                .unwrap_or(0),
            0x4e => script
                .get(cursor..cursor + 4)
                .map(|b| 4 + u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
                .unwrap_or(0),
            _ => 0,
        };
        cursor = cursor.saturating_add(push_len).min(script.len());
        if opcode != OP_CODESEPARATOR {
            out.extend_from_slice(&script[start..cursor]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_but_not_push_payloads() {
        let script = [0x76, OP_CODESEPARATOR, 0x02, OP_CODESEPARATOR, 0x00, 0xac];
        assert_eq!(
            strip_code_separators(&script),
            vec![0x76, 0x02, OP_CODESEPARATOR, 0x00, 0xac]
        );
    }

    #[test]
    fn defined_types() {
        assert!(SighashType(SIGHASH_ALL).is_defined());
        assert!(SighashType(SIGHASH_SINGLE | SIGHASH_ANYONECANPAY).is_defined());
        assert!(!SighashType(0).is_defined());
        assert!(!SighashType(0x04).is_defined());
        assert!(!SighashType(0x21).is_defined());
    }
}
