use ledgerd_primitives::{hash160, OutPoint, Transaction, TxIn, TxOut};
use ledgerd_script::instruction::push_data;
use ledgerd_script::interpreter::{SCRIPT_VERIFY_NONE, SCRIPT_VERIFY_P2SH};
use ledgerd_script::num;
use ledgerd_script::opcodes::*;
use ledgerd_script::sighash::{signature_hash, SighashType, SIGHASH_ALL};
use ledgerd_script::{verify_script, ScriptError, BLOCK_SCRIPT_VERIFY_FLAGS};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

fn key(seed: u8) -> (SecretKey, Vec<u8>) {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[seed; 32]).expect("secret key");
    let public = PublicKey::from_secret_key(&secp, &secret);
    (secret, public.serialize().to_vec())
}

fn sign(tx: &Transaction, index: usize, script_code: &[u8], secret: &SecretKey) -> Vec<u8> {
    let digest =
        signature_hash(tx, index, script_code, SighashType(SIGHASH_ALL)).expect("sighash");
    let sig = Secp256k1::new().sign_ecdsa(&Message::from_digest(digest), secret);
    let mut out = sig.serialize_der().to_vec();
    out.push(SIGHASH_ALL as u8);
    out
}

fn spending_tx() -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::new([0x42; 32], 0),
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 4_000,
            script_pubkey: vec![OP_1],
        }],
        lock_time: 0,
    }
}

fn p2pkh(pubkey: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_DUP, OP_HASH160];
    script.extend_from_slice(&push_data(&hash160(pubkey)));
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

fn multisig(required: u8, pubkeys: &[&[u8]]) -> Vec<u8> {
    let mut script = vec![OP_1 + required - 1];
    for pubkey in pubkeys {
        script.extend_from_slice(&push_data(pubkey));
    }
    script.push(OP_1 + pubkeys.len() as u8 - 1);
    script.push(OP_CHECKMULTISIG);
    script
}

#[test]
fn p2pkh_spend_verifies() {
    let (secret, pubkey) = key(0x11);
    let script_pubkey = p2pkh(&pubkey);
    let tx = spending_tx();
    let sig = sign(&tx, 0, &script_pubkey, &secret);
    let mut script_sig = push_data(&sig);
    script_sig.extend_from_slice(&push_data(&pubkey));

    verify_script(&script_sig, &script_pubkey, &tx, 0, 5_000, BLOCK_SCRIPT_VERIFY_FLAGS)
        .expect("valid spend");
}

#[test]
fn p2pkh_with_wrong_key_fails_equalverify() {
    let (secret, pubkey) = key(0x11);
    let (_, other_pubkey) = key(0x22);
    let script_pubkey = p2pkh(&pubkey);
    let tx = spending_tx();
    let sig = sign(&tx, 0, &script_pubkey, &secret);
    let mut script_sig = push_data(&sig);
    script_sig.extend_from_slice(&push_data(&other_pubkey));

    assert_eq!(
        verify_script(&script_sig, &script_pubkey, &tx, 0, 5_000, BLOCK_SCRIPT_VERIFY_FLAGS),
        Err(ScriptError::EqualVerify)
    );
}

#[test]
fn signature_over_different_outputs_fails() {
    let (secret, pubkey) = key(0x11);
    let script_pubkey = p2pkh(&pubkey);
    let tx = spending_tx();
    let sig = sign(&tx, 0, &script_pubkey, &secret);
    let mut script_sig = push_data(&sig);
    script_sig.extend_from_slice(&push_data(&pubkey));

    let mut tampered = tx.clone();
    tampered.vout[0].value = 4_999;
    let err = verify_script(
        &script_sig,
        &script_pubkey,
        &tampered,
        0,
        5_000,
        BLOCK_SCRIPT_VERIFY_FLAGS,
    )
    .expect_err("tampered");
    assert_eq!(err, ScriptError::EvalFalse);
    assert!(!err.is_resource_limit());
}

#[test]
fn p2pk_spend_verifies() {
    let (secret, pubkey) = key(0x33);
    let mut script_pubkey = push_data(&pubkey);
    script_pubkey.push(OP_CHECKSIG);
    let tx = spending_tx();
    let script_sig = push_data(&sign(&tx, 0, &script_pubkey, &secret));

    verify_script(&script_sig, &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS)
        .expect("valid spend");
}

#[test]
fn bare_one_of_two_multisig() {
    let (_, pk1) = key(0x44);
    let (secret2, pk2) = key(0x55);
    let script_pubkey = multisig(1, &[&pk1, &pk2]);
    let tx = spending_tx();
    let mut script_sig = vec![OP_0];
    script_sig.extend_from_slice(&push_data(&sign(&tx, 0, &script_pubkey, &secret2)));

    verify_script(&script_sig, &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS)
        .expect("valid spend");
}

#[test]
fn p2sh_two_of_two_multisig() {
    let (secret1, pk1) = key(0x66);
    let (secret2, pk2) = key(0x77);
    let redeem = multisig(2, &[&pk1, &pk2]);
    let mut script_pubkey = vec![OP_HASH160];
    script_pubkey.extend_from_slice(&push_data(&hash160(&redeem)));
    script_pubkey.push(OP_EQUAL);

    let tx = spending_tx();
    let mut script_sig = vec![OP_0];
    script_sig.extend_from_slice(&push_data(&sign(&tx, 0, &redeem, &secret1)));
    script_sig.extend_from_slice(&push_data(&sign(&tx, 0, &redeem, &secret2)));
    script_sig.extend_from_slice(&push_data(&redeem));

    verify_script(&script_sig, &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS)
        .expect("valid spend");

    // Signatures in the wrong order do not satisfy the redeem script.
    let mut swapped = vec![OP_0];
    swapped.extend_from_slice(&push_data(&sign(&tx, 0, &redeem, &secret2)));
    swapped.extend_from_slice(&push_data(&sign(&tx, 0, &redeem, &secret1)));
    swapped.extend_from_slice(&push_data(&redeem));
    assert_eq!(
        verify_script(&swapped, &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS),
        Err(ScriptError::EvalFalse)
    );
}

#[test]
fn p2sh_redeem_script_only_runs_when_enabled() {
    // Redeem script that always fails; the outer hash check still passes.
    let redeem = vec![OP_0];
    let mut script_pubkey = vec![OP_HASH160];
    script_pubkey.extend_from_slice(&push_data(&hash160(&redeem)));
    script_pubkey.push(OP_EQUAL);
    let script_sig = push_data(&redeem);
    let tx = spending_tx();

    verify_script(&script_sig, &script_pubkey, &tx, 0, 1, SCRIPT_VERIFY_NONE)
        .expect("legacy semantics");
    assert_eq!(
        verify_script(&script_sig, &script_pubkey, &tx, 0, 1, SCRIPT_VERIFY_P2SH),
        Err(ScriptError::EvalFalse)
    );
}

#[test]
fn non_strict_der_is_rejected_under_block_flags() {
    let (secret, pubkey) = key(0x11);
    let script_pubkey = p2pkh(&pubkey);
    let tx = spending_tx();
    let strict = sign(&tx, 0, &script_pubkey, &secret);

    // Pad R with a redundant zero byte.
    let r_len = strict[3];
    let mut padded = vec![0x30, strict[1] + 1, 0x02, r_len + 1, 0x00];
    padded.extend_from_slice(&strict[4..]);

    let mut script_sig = push_data(&padded);
    script_sig.extend_from_slice(&push_data(&pubkey));
    assert_eq!(
        verify_script(&script_sig, &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS),
        Err(ScriptError::SigEncoding)
    );
}

#[test]
fn op_budget_exhaustion_is_a_resource_limit() {
    let mut script_pubkey = vec![OP_NOP; 202];
    script_pubkey.push(OP_1);
    let tx = spending_tx();
    let err = verify_script(&[], &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS)
        .expect_err("over budget");
    assert_eq!(err, ScriptError::OpCount);
    assert!(err.is_resource_limit());
}

#[test]
fn checklocktimeverify_compares_against_tx_lock_time() {
    let mut script_pubkey = push_data(&num::encode(100));
    script_pubkey.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1]);

    let mut tx = spending_tx();
    tx.vin[0].sequence = 0;
    tx.lock_time = 50;
    assert_eq!(
        verify_script(&[], &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS),
        Err(ScriptError::UnsatisfiedLockTime)
    );

    tx.lock_time = 150;
    verify_script(&[], &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS)
        .expect("lock time reached");

    tx.vin[0].sequence = u32::MAX;
    assert_eq!(
        verify_script(&[], &script_pubkey, &tx, 0, 1, BLOCK_SCRIPT_VERIFY_FLAGS),
        Err(ScriptError::UnsatisfiedLockTime)
    );
}
