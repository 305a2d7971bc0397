//! Signature-operation counting for the block sigop limit.

use crate::instruction::Instructions;
use crate::opcodes::{
    small_int, OP_CHECKMULTISIG, OP_CHECKMULTISIGVERIFY, OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_1,
    OP_16,
};

const MULTISIG_WORST_CASE: usize = 20;

/// Count CHECKSIG-family opcodes in `script`.
///
/// With `accurate`, a CHECKMULTISIG preceded by `OP_1`..`OP_16` counts that
/// many keys; otherwise it is charged the worst case. Counting stops at the
/// first malformed push.
pub fn legacy_sigop_count(script: &[u8], accurate: bool) -> usize {
    let mut count = 0usize;
    let mut last_opcode = None;
    for instruction in Instructions::new(script) {
        let Ok(instruction) = instruction else {
            break;
        };
        match instruction.opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                count += match last_opcode {
                    Some(op @ OP_1..=OP_16) if accurate => {
                        small_int(op).map(|n| n as usize).unwrap_or(MULTISIG_WORST_CASE)
                    }
                    _ => MULTISIG_WORST_CASE,
                };
            }
            _ => {}
        }
        last_opcode = Some(instruction.opcode);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{OP_2, OP_3, OP_DUP, OP_EQUALVERIFY, OP_HASH160};

    #[test]
    fn counts_p2pkh_as_one() {
        let mut script = vec![OP_DUP, OP_HASH160, 0x14];
        script.extend_from_slice(&[0u8; 20]);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        assert_eq!(legacy_sigop_count(&script, false), 1);
    }

    #[test]
    fn multisig_accuracy() {
        let script = [OP_2, OP_3, OP_CHECKMULTISIG];
        assert_eq!(legacy_sigop_count(&script, false), 20);
        assert_eq!(legacy_sigop_count(&script, true), 3);
    }

    #[test]
    fn stops_at_truncated_push() {
        let script = [OP_CHECKSIG, 0x05, OP_CHECKSIG];
        assert_eq!(legacy_sigop_count(&script, false), 1);
    }
}
