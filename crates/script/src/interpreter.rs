//! Script interpreter with consensus resource limits.

use std::sync::OnceLock;

use ledgerd_consensus::constants::{
    LOCKTIME_THRESHOLD, MAX_OPS_PER_SCRIPT, MAX_PUBKEYS_PER_MULTISIG, MAX_SCRIPT_ELEMENT_SIZE,
    MAX_SCRIPT_SIZE, MAX_STACK_SIZE,
};
use ledgerd_primitives::hash::{hash160, sha256, sha256d};
use ledgerd_primitives::transaction::SEQUENCE_FINAL;
use ledgerd_primitives::Transaction;
use ripemd::{Digest, Ripemd160};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, VerifyOnly};
use sha1::Sha1;

use crate::instruction::{find_and_delete, is_p2sh, is_push_only, next_instruction, push_data};
use crate::num::{self, cast_to_bool, DEFAULT_MAX_NUM_SIZE};
use crate::opcodes::*;
use crate::sighash::{signature_hash, SighashType};

pub const SCRIPT_VERIFY_NONE: u32 = 0;
pub const SCRIPT_VERIFY_P2SH: u32 = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: u32 = 1 << 1;
pub const SCRIPT_VERIFY_DERSIG: u32 = 1 << 2;
pub const SCRIPT_VERIFY_LOW_S: u32 = 1 << 3;
pub const SCRIPT_VERIFY_NULLDUMMY: u32 = 1 << 4;
pub const SCRIPT_VERIFY_SIGPUSHONLY: u32 = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: u32 = 1 << 6;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
pub const SCRIPT_VERIFY_CLEANSTACK: u32 = 1 << 8;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;

/// Flags every block input is checked against.
pub const BLOCK_SCRIPT_VERIFY_FLAGS: u32 =
    SCRIPT_VERIFY_P2SH | SCRIPT_VERIFY_DERSIG | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY;

pub const STANDARD_SCRIPT_VERIFY_FLAGS: u32 = BLOCK_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_VERIFY_LOW_S
    | SCRIPT_VERIFY_NULLDUMMY
    | SCRIPT_VERIFY_SIGPUSHONLY
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | SCRIPT_VERIFY_CLEANSTACK;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptError {
    ScriptSize,
    PushSize,
    OpCount,
    StackSize,
    PubkeyCount,
    SigCount,
    EvalFalse,
    OpReturn,
    Verify,
    EqualVerify,
    NumEqualVerify,
    CheckSigVerify,
    CheckMultisigVerify,
    BadOpcode,
    DisabledOpcode,
    UnbalancedConditional,
    StackUnderflow,
    AltStackUnderflow,
    NumOverflow,
    MinimalData,
    NegativeLockTime,
    UnsatisfiedLockTime,
    SigEncoding,
    SigHighS,
    SigHashType,
    PubkeyEncoding,
    SigPushOnly,
    NullDummy,
    CleanStack,
    DiscourageUpgradableNops,
    /// The check does not refer to an existing input.
    UnknownError,
}

impl ScriptError {
    /// Errors raised by the execution budget rather than by script logic.
    pub fn is_resource_limit(self) -> bool {
        matches!(
            self,
            ScriptError::ScriptSize
                | ScriptError::PushSize
                | ScriptError::OpCount
                | ScriptError::StackSize
                | ScriptError::PubkeyCount
                | ScriptError::SigCount
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptError::ScriptSize => "script-size",
            ScriptError::PushSize => "push-size",
            ScriptError::OpCount => "op-count",
            ScriptError::StackSize => "stack-size",
            ScriptError::PubkeyCount => "pubkey-count",
            ScriptError::SigCount => "sig-count",
            ScriptError::EvalFalse => "eval-false",
            ScriptError::OpReturn => "op-return",
            ScriptError::Verify => "verify",
            ScriptError::EqualVerify => "equalverify",
            ScriptError::NumEqualVerify => "numequalverify",
            ScriptError::CheckSigVerify => "checksigverify",
            ScriptError::CheckMultisigVerify => "checkmultisigverify",
            ScriptError::BadOpcode => "bad-opcode",
            ScriptError::DisabledOpcode => "disabled-opcode",
            ScriptError::UnbalancedConditional => "unbalanced-conditional",
            ScriptError::StackUnderflow => "stack-underflow",
            ScriptError::AltStackUnderflow => "altstack-underflow",
            ScriptError::NumOverflow => "num-overflow",
            ScriptError::MinimalData => "minimaldata",
            ScriptError::NegativeLockTime => "negative-locktime",
            ScriptError::UnsatisfiedLockTime => "unsatisfied-locktime",
            ScriptError::SigEncoding => "sig-der",
            ScriptError::SigHighS => "sig-high-s",
            ScriptError::SigHashType => "sig-hashtype",
            ScriptError::PubkeyEncoding => "pubkeytype",
            ScriptError::SigPushOnly => "sig-pushonly",
            ScriptError::NullDummy => "sig-nulldummy",
            ScriptError::CleanStack => "cleanstack",
            ScriptError::DiscourageUpgradableNops => "discourage-upgradable-nops",
            ScriptError::UnknownError => "unknown-error",
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ScriptError {}

/// Evaluate `script_sig` then `script_pubkey` (and a P2SH redeem script when
/// enabled) for input `input_index` of `tx`.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    tx: &Transaction,
    input_index: usize,
    amount: i64,
    flags: u32,
) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_SIGPUSHONLY) != 0 && !is_push_only(script_sig) {
        return Err(ScriptError::SigPushOnly);
    }

    let checker = SignatureChecker::new(tx, input_index, amount);
    let mut stack = Vec::new();
    eval_script(&mut stack, script_sig, flags, &checker)?;
    let p2sh_stack = if (flags & SCRIPT_VERIFY_P2SH) != 0 {
        stack.clone()
    } else {
        Vec::new()
    };

    eval_script(&mut stack, script_pubkey, flags, &checker)?;
    if !stack.last().is_some_and(|top| cast_to_bool(top)) {
        return Err(ScriptError::EvalFalse);
    }

    if (flags & SCRIPT_VERIFY_P2SH) != 0 && is_p2sh(script_pubkey) {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }
        stack = p2sh_stack;
        let redeem_script = stack.pop().ok_or(ScriptError::StackUnderflow)?;
        eval_script(&mut stack, &redeem_script, flags, &checker)?;
        if !stack.last().is_some_and(|top| cast_to_bool(top)) {
            return Err(ScriptError::EvalFalse);
        }
    }

    if (flags & SCRIPT_VERIFY_CLEANSTACK) != 0
        && (flags & SCRIPT_VERIFY_P2SH) != 0
        && stack.len() != 1
    {
        return Err(ScriptError::CleanStack);
    }

    Ok(())
}

static VERIFY_CONTEXT: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();

fn verify_context() -> &'static Secp256k1<VerifyOnly> {
    VERIFY_CONTEXT.get_or_init(Secp256k1::verification_only)
}

/// Signature and lock-time checks bound to one transaction input.
pub struct SignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    amount: i64,
}

impl<'a> SignatureChecker<'a> {
    pub fn new(tx: &'a Transaction, input_index: usize, amount: i64) -> Self {
        Self {
            tx,
            input_index,
            amount,
        }
    }

    fn check_sig(
        &self,
        sig_bytes: &[u8],
        pubkey_bytes: &[u8],
        script_code: &[u8],
        flags: u32,
    ) -> Result<bool, ScriptError> {
        if sig_bytes.is_empty() {
            return Ok(false);
        }
        check_signature_encoding(sig_bytes, flags)?;
        if (flags & SCRIPT_VERIFY_STRICTENC) != 0 && !is_valid_pubkey(pubkey_bytes) {
            return Err(ScriptError::PubkeyEncoding);
        }

        let (hash_type, der) = match sig_bytes.split_last() {
            Some((hash_type, der)) => (*hash_type as u32, der),
            None => return Ok(false),
        };
        let Ok(mut sig) = Signature::from_der_lax(der) else {
            return Ok(false);
        };
        sig.normalize_s();
        let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
            return Ok(false);
        };

        let digest = match signature_hash(
            self.tx,
            self.input_index,
            script_code,
            SighashType(hash_type),
        ) {
            Ok(digest) => digest,
            Err(err) => {
                ledgerd_log::log_debug!(
                    "sighash unavailable for input {} ({} sat): {}",
                    self.input_index,
                    self.amount,
                    err
                );
                return Ok(false);
            }
        };
        let msg = Message::from_digest(digest);
        Ok(verify_context().verify_ecdsa(&msg, &sig, &pubkey).is_ok())
    }

    fn check_lock_time(&self, lock_time: i64) -> Result<(), ScriptError> {
        let threshold = LOCKTIME_THRESHOLD as i64;
        let tx_lock_time = self.tx.lock_time as i64;
        if (tx_lock_time < threshold) != (lock_time < threshold) {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        if lock_time > tx_lock_time {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        let sequence = self
            .tx
            .vin
            .get(self.input_index)
            .map(|input| input.sequence)
            .ok_or(ScriptError::UnsatisfiedLockTime)?;
        if sequence == SEQUENCE_FINAL {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        Ok(())
    }
}

/// Run one script against `stack`.
///
/// Every opcode above `OP_16` counts against `MAX_OPS_PER_SCRIPT`, including
/// those in unexecuted branches; `CHECKMULTISIG` also charges its key count.
pub fn eval_script(
    stack: &mut Vec<Vec<u8>>,
    script: &[u8],
    flags: u32,
    checker: &SignatureChecker<'_>,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let require_minimal = (flags & SCRIPT_VERIFY_MINIMALDATA) != 0;
    let discourage_nops = (flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS) != 0;

    let mut exec_stack: Vec<bool> = Vec::new();
    let mut alt_stack: Vec<Vec<u8>> = Vec::new();
    let mut op_count = 0usize;
    let mut code_start = 0usize;
    let mut pc = 0usize;

    while pc < script.len() {
        let executing = !exec_stack.contains(&false);
        let instruction = next_instruction(script, &mut pc)?;
        let opcode = instruction.opcode;

        if instruction.data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }
        if is_disabled(opcode) {
            return Err(ScriptError::DisabledOpcode);
        }

        if executing && opcode <= OP_PUSHDATA4 {
            if require_minimal && !check_minimal_push(instruction.data, opcode) {
                return Err(ScriptError::MinimalData);
            }
            stack.push(instruction.data.to_vec());
        } else if executing || (OP_IF..=OP_ENDIF).contains(&opcode) {
            match opcode {
                OP_1NEGATE => stack.push(num::encode(-1)),
                OP_1..=OP_16 => stack.push(num::encode((opcode - OP_1) as i64 + 1)),

                OP_NOP => {}
                OP_NOP1 | OP_NOP3..=OP_NOP10 => {
                    if discourage_nops {
                        return Err(ScriptError::DiscourageUpgradableNops);
                    }
                }
                OP_CHECKLOCKTIMEVERIFY => {
                    if (flags & SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY) != 0 {
                        // Five bytes so lock times past 2038 still fit.
                        let lock_time = num::decode(peek(stack, 1)?, require_minimal, 5)?;
                        if lock_time < 0 {
                            return Err(ScriptError::NegativeLockTime);
                        }
                        checker.check_lock_time(lock_time)?;
                    } else if discourage_nops {
                        return Err(ScriptError::DiscourageUpgradableNops);
                    }
                }

                OP_IF | OP_NOTIF => {
                    let mut value = false;
                    if executing {
                        let top = stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                        value = cast_to_bool(&top);
                        if opcode == OP_NOTIF {
                            value = !value;
                        }
                    }
                    exec_stack.push(value);
                }
                OP_ELSE => {
                    let last = exec_stack
                        .last_mut()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                    *last = !*last;
                }
                OP_ENDIF => {
                    exec_stack
                        .pop()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                }
                OP_VERIFY => {
                    if !cast_to_bool(&pop(stack)?) {
                        return Err(ScriptError::Verify);
                    }
                }
                OP_RETURN => return Err(ScriptError::OpReturn),

                OP_TOALTSTACK => alt_stack.push(pop(stack)?),
                OP_FROMALTSTACK => {
                    let value = alt_stack.pop().ok_or(ScriptError::AltStackUnderflow)?;
                    stack.push(value);
                }
                OP_2DROP => {
                    require(stack, 2)?;
                    stack.truncate(stack.len() - 2);
                }
                OP_2DUP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 2..);
                }
                OP_3DUP => {
                    require(stack, 3)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 3..);
                }
                OP_2OVER => {
                    require(stack, 4)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 4..len - 2);
                }
                OP_2ROT => {
                    require(stack, 6)?;
                    let len = stack.len();
                    let moved: Vec<_> = stack.drain(len - 6..len - 4).collect();
                    stack.extend(moved);
                }
                OP_2SWAP => {
                    require(stack, 4)?;
                    let len = stack.len();
                    stack.swap(len - 4, len - 2);
                    stack.swap(len - 3, len - 1);
                }
                OP_IFDUP => {
                    let top = peek(stack, 1)?;
                    if cast_to_bool(top) {
                        let copy = top.clone();
                        stack.push(copy);
                    }
                }
                OP_DEPTH => stack.push(num::encode(stack.len() as i64)),
                OP_DROP => {
                    pop(stack)?;
                }
                OP_DUP => {
                    let copy = peek(stack, 1)?.clone();
                    stack.push(copy);
                }
                OP_NIP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.remove(len - 2);
                }
                OP_OVER => {
                    let copy = peek(stack, 2)?.clone();
                    stack.push(copy);
                }
                OP_PICK | OP_ROLL => {
                    let depth = pop_num(stack, require_minimal)?;
                    if depth < 0 || depth as usize >= stack.len() {
                        return Err(ScriptError::StackUnderflow);
                    }
                    let index = stack.len() - 1 - depth as usize;
                    let value = if opcode == OP_ROLL {
                        stack.remove(index)
                    } else {
                        stack[index].clone()
                    };
                    stack.push(value);
                }
                OP_ROT => {
                    require(stack, 3)?;
                    let len = stack.len();
                    let value = stack.remove(len - 3);
                    stack.push(value);
                }
                OP_SWAP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.swap(len - 2, len - 1);
                }
                OP_TUCK => {
                    require(stack, 2)?;
                    let copy = peek(stack, 1)?.clone();
                    let len = stack.len();
                    stack.insert(len - 2, copy);
                }
                OP_SIZE => {
                    let size = peek(stack, 1)?.len();
                    stack.push(num::encode(size as i64));
                }

                OP_EQUAL | OP_EQUALVERIFY => {
                    require(stack, 2)?;
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    let equal = a == b;
                    if opcode == OP_EQUALVERIFY {
                        if !equal {
                            return Err(ScriptError::EqualVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(equal));
                    }
                }

                OP_1ADD => unary(stack, require_minimal, |n| n + 1)?,
                OP_1SUB => unary(stack, require_minimal, |n| n - 1)?,
                OP_NEGATE => unary(stack, require_minimal, |n| -n)?,
                OP_ABS => unary(stack, require_minimal, i64::abs)?,
                OP_NOT => unary(stack, require_minimal, |n| (n == 0) as i64)?,
                OP_0NOTEQUAL => unary(stack, require_minimal, |n| (n != 0) as i64)?,

                OP_ADD => binary(stack, require_minimal, |a, b| a + b)?,
                OP_SUB => binary(stack, require_minimal, |a, b| a - b)?,
                OP_BOOLAND => binary(stack, require_minimal, |a, b| (a != 0 && b != 0) as i64)?,
                OP_BOOLOR => binary(stack, require_minimal, |a, b| (a != 0 || b != 0) as i64)?,
                OP_NUMEQUAL => binary(stack, require_minimal, |a, b| (a == b) as i64)?,
                OP_NUMEQUALVERIFY => {
                    binary(stack, require_minimal, |a, b| (a == b) as i64)?;
                    if !cast_to_bool(&pop(stack)?) {
                        return Err(ScriptError::NumEqualVerify);
                    }
                }
                OP_NUMNOTEQUAL => binary(stack, require_minimal, |a, b| (a != b) as i64)?,
                OP_LESSTHAN => binary(stack, require_minimal, |a, b| (a < b) as i64)?,
                OP_GREATERTHAN => binary(stack, require_minimal, |a, b| (a > b) as i64)?,
                OP_LESSTHANOREQUAL => binary(stack, require_minimal, |a, b| (a <= b) as i64)?,
                OP_GREATERTHANOREQUAL => {
                    binary(stack, require_minimal, |a, b| (a >= b) as i64)?
                }
                OP_MIN => binary(stack, require_minimal, i64::min)?,
                OP_MAX => binary(stack, require_minimal, i64::max)?,
                OP_WITHIN => {
                    require(stack, 3)?;
                    let max = pop_num(stack, require_minimal)?;
                    let min = pop_num(stack, require_minimal)?;
                    let value = pop_num(stack, require_minimal)?;
                    stack.push(bool_to_vec(min <= value && value < max));
                }

                OP_RIPEMD160 => {
                    let value = pop(stack)?;
                    stack.push(Ripemd160::digest(&value).to_vec());
                }
                OP_SHA1 => {
                    let value = pop(stack)?;
                    stack.push(Sha1::digest(&value).to_vec());
                }
                OP_SHA256 => {
                    let value = pop(stack)?;
                    stack.push(sha256(&value).to_vec());
                }
                OP_HASH160 => {
                    let value = pop(stack)?;
                    stack.push(hash160(&value).to_vec());
                }
                OP_HASH256 => {
                    let value = pop(stack)?;
                    stack.push(sha256d(&value).to_vec());
                }
                OP_CODESEPARATOR => code_start = pc,

                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    require(stack, 2)?;
                    let pubkey = pop(stack)?;
                    let sig = pop(stack)?;
                    let script_code = find_and_delete(&script[code_start..], &push_data(&sig));
                    let ok = checker.check_sig(&sig, &pubkey, &script_code, flags)?;
                    if opcode == OP_CHECKSIGVERIFY {
                        if !ok {
                            return Err(ScriptError::CheckSigVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(ok));
                    }
                }

                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let ok = check_multisig(
                        stack,
                        &script[code_start..],
                        flags,
                        checker,
                        &mut op_count,
                    )?;
                    if opcode == OP_CHECKMULTISIGVERIFY {
                        if !ok {
                            return Err(ScriptError::CheckMultisigVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(ok));
                    }
                }

                _ => return Err(ScriptError::BadOpcode),
            }
        }

        if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    if !exec_stack.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

/// Stack layout, top first: key count, keys, sig count, sigs, dummy.
fn check_multisig(
    stack: &mut Vec<Vec<u8>>,
    script_code: &[u8],
    flags: u32,
    checker: &SignatureChecker<'_>,
    op_count: &mut usize,
) -> Result<bool, ScriptError> {
    let require_minimal = (flags & SCRIPT_VERIFY_MINIMALDATA) != 0;

    let key_count = num::decode(peek(stack, 1)?, require_minimal, DEFAULT_MAX_NUM_SIZE)?;
    if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
        return Err(ScriptError::PubkeyCount);
    }
    let key_count = key_count as usize;
    *op_count += key_count;
    if *op_count > MAX_OPS_PER_SCRIPT {
        return Err(ScriptError::OpCount);
    }

    let sig_count_depth = key_count + 2;
    let sig_count = num::decode(
        peek(stack, sig_count_depth)?,
        require_minimal,
        DEFAULT_MAX_NUM_SIZE,
    )?;
    if sig_count < 0 || sig_count as usize > key_count {
        return Err(ScriptError::SigCount);
    }
    let sig_count = sig_count as usize;
    let dummy_depth = sig_count_depth + sig_count + 1;
    let dummy = peek(stack, dummy_depth)?;
    if (flags & SCRIPT_VERIFY_NULLDUMMY) != 0 && !dummy.is_empty() {
        return Err(ScriptError::NullDummy);
    }

    let keys: Vec<&Vec<u8>> = (0..key_count)
        .map(|k| peek(stack, 2 + k))
        .collect::<Result<_, _>>()?;
    let sigs: Vec<&Vec<u8>> = (0..sig_count)
        .map(|s| peek(stack, sig_count_depth + 1 + s))
        .collect::<Result<_, _>>()?;

    let mut script_code = script_code.to_vec();
    for sig in &sigs {
        script_code = find_and_delete(&script_code, &push_data(sig));
    }

    let mut success = true;
    let (mut key_idx, mut sig_idx) = (0usize, 0usize);
    while success && sig_idx < sig_count {
        if checker.check_sig(sigs[sig_idx], keys[key_idx], &script_code, flags)? {
            sig_idx += 1;
        }
        key_idx += 1;
        // Not enough keys left to match the remaining signatures.
        if sig_count - sig_idx > key_count - key_idx {
            success = false;
        }
    }

    stack.truncate(stack.len() - dummy_depth);
    Ok(success)
}

fn check_signature_encoding(sig: &[u8], flags: u32) -> Result<(), ScriptError> {
    if (flags & (SCRIPT_VERIFY_DERSIG | SCRIPT_VERIFY_LOW_S | SCRIPT_VERIFY_STRICTENC)) != 0
        && !is_valid_signature_encoding(sig)
    {
        return Err(ScriptError::SigEncoding);
    }
    if (flags & SCRIPT_VERIFY_LOW_S) != 0 && !is_low_s(sig) {
        return Err(ScriptError::SigHighS);
    }
    if (flags & SCRIPT_VERIFY_STRICTENC) != 0 {
        let hash_type = sig.last().copied().unwrap_or(0) as u32;
        if !SighashType(hash_type).is_defined() {
            return Err(ScriptError::SigHashType);
        }
    }
    Ok(())
}

/// Strict DER plus a trailing hash type byte.
fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 || sig[1] as usize != sig.len() - 3 {
        return false;
    }
    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;
    if len_r + len_s + 7 != sig.len() {
        return false;
    }
    if sig[2] != 0x02 || len_r == 0 || (sig[4] & 0x80) != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && (sig[5] & 0x80) == 0 {
        return false;
    }
    if sig[len_r + 4] != 0x02 || len_s == 0 || (sig[len_r + 6] & 0x80) != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && (sig[len_r + 7] & 0x80) == 0 {
        return false;
    }
    true
}

fn is_low_s(sig: &[u8]) -> bool {
    let Some((_, der)) = sig.split_last() else {
        return false;
    };
    match Signature::from_der(der) {
        Ok(parsed) => {
            let mut normalized = parsed;
            normalized.normalize_s();
            normalized == parsed
        }
        Err(_) => false,
    }
}

fn is_valid_pubkey(data: &[u8]) -> bool {
    match data.len() {
        33 => data[0] == 0x02 || data[0] == 0x03,
        65 => data[0] == 0x04,
        _ => false,
    }
}

fn check_minimal_push(data: &[u8], opcode: u8) -> bool {
    if data.is_empty() {
        return opcode == OP_0;
    }
    if data.len() == 1 && (1..=16).contains(&data[0]) {
        return false;
    }
    if data.len() == 1 && data[0] == 0x81 {
        return false;
    }
    if data.len() <= 75 {
        return opcode as usize == data.len();
    }
    if data.len() <= 255 {
        return opcode == OP_PUSHDATA1;
    }
    if data.len() <= 65535 {
        return opcode == OP_PUSHDATA2;
    }
    true
}

fn require(stack: &[Vec<u8>], depth: usize) -> Result<(), ScriptError> {
    if stack.len() < depth {
        return Err(ScriptError::StackUnderflow);
    }
    Ok(())
}

/// Element `depth` from the top, 1-based.
fn peek(stack: &[Vec<u8>], depth: usize) -> Result<&Vec<u8>, ScriptError> {
    stack
        .len()
        .checked_sub(depth)
        .map(|index| &stack[index])
        .ok_or(ScriptError::StackUnderflow)
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::StackUnderflow)
}

fn pop_num(stack: &mut Vec<Vec<u8>>, require_minimal: bool) -> Result<i64, ScriptError> {
    let value = pop(stack)?;
    num::decode(&value, require_minimal, DEFAULT_MAX_NUM_SIZE)
}

fn unary(
    stack: &mut Vec<Vec<u8>>,
    require_minimal: bool,
    op: impl Fn(i64) -> i64,
) -> Result<(), ScriptError> {
    let value = pop_num(stack, require_minimal)?;
    stack.push(num::encode(op(value)));
    Ok(())
}

fn binary(
    stack: &mut Vec<Vec<u8>>,
    require_minimal: bool,
    op: impl Fn(i64, i64) -> i64,
) -> Result<(), ScriptError> {
    require(stack, 2)?;
    let b = pop_num(stack, require_minimal)?;
    let a = pop_num(stack, require_minimal)?;
    stack.push(num::encode(op(a, b)));
    Ok(())
}

fn bool_to_vec(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}
