use ledgerd_primitives::{OutPoint, Transaction, TxIn, TxOut};
use ledgerd_script::sighash::{
    signature_hash, SighashError, SighashType, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE,
    SIGHASH_SINGLE,
};

fn two_in_two_out() -> Transaction {
    Transaction {
        version: 1,
        vin: vec![
            TxIn {
                prevout: OutPoint::new([1u8; 32], 0),
                script_sig: Vec::new(),
                sequence: u32::MAX,
            },
            TxIn {
                prevout: OutPoint::new([2u8; 32], 1),
                script_sig: Vec::new(),
                sequence: u32::MAX,
            },
        ],
        vout: vec![
            TxOut {
                value: 10,
                script_pubkey: vec![0x51],
            },
            TxOut {
                value: 20,
                script_pubkey: vec![0x52],
            },
        ],
        lock_time: 0,
    }
}

#[test]
fn sighash_type_flags() {
    let combined = SighashType(SIGHASH_ALL | SIGHASH_ANYONECANPAY);
    assert_eq!(combined.base_type(), SIGHASH_ALL);
    assert!(combined.has_anyone_can_pay());

    let none = SighashType(SIGHASH_NONE);
    assert_eq!(none.base_type(), SIGHASH_NONE);
    assert!(!none.has_anyone_can_pay());

    let single = SighashType(SIGHASH_SINGLE | SIGHASH_ANYONECANPAY);
    assert_eq!(single.base_type(), SIGHASH_SINGLE);
    assert!(single.has_anyone_can_pay());
}

#[test]
fn all_commits_to_outputs_and_other_inputs() {
    let tx = two_in_two_out();
    let base = signature_hash(&tx, 0, &[0xac], SighashType(SIGHASH_ALL)).expect("sighash");

    let mut changed_output = tx.clone();
    changed_output.vout[1].value += 1;
    assert_ne!(
        base,
        signature_hash(&changed_output, 0, &[0xac], SighashType(SIGHASH_ALL)).expect("sighash")
    );

    let mut changed_input = tx.clone();
    changed_input.vin[1].prevout = OutPoint::new([3u8; 32], 1);
    assert_ne!(
        base,
        signature_hash(&changed_input, 0, &[0xac], SighashType(SIGHASH_ALL)).expect("sighash")
    );
}

#[test]
fn script_sigs_are_not_committed() {
    let tx = two_in_two_out();
    let base = signature_hash(&tx, 0, &[0xac], SighashType(SIGHASH_ALL)).expect("sighash");
    let mut signed = tx.clone();
    signed.vin[0].script_sig = vec![0x01, 0x02];
    signed.vin[1].script_sig = vec![0x03, 0x04];
    assert_eq!(
        base,
        signature_hash(&signed, 0, &[0xac], SighashType(SIGHASH_ALL)).expect("sighash")
    );
}

#[test]
fn anyone_can_pay_ignores_other_inputs() {
    let tx = two_in_two_out();
    let kind = SighashType(SIGHASH_ALL | SIGHASH_ANYONECANPAY);
    let base = signature_hash(&tx, 0, &[0xac], kind).expect("sighash");
    let mut changed = tx.clone();
    changed.vin[1].prevout = OutPoint::new([9u8; 32], 7);
    assert_eq!(base, signature_hash(&changed, 0, &[0xac], kind).expect("sighash"));
}

#[test]
fn none_ignores_outputs_and_single_only_its_own() {
    let tx = two_in_two_out();
    let none = SighashType(SIGHASH_NONE);
    let single = SighashType(SIGHASH_SINGLE);
    let base_none = signature_hash(&tx, 0, &[0xac], none).expect("sighash");
    let base_single = signature_hash(&tx, 0, &[0xac], single).expect("sighash");

    let mut changed = tx.clone();
    changed.vout[1].value = 999;
    assert_eq!(base_none, signature_hash(&changed, 0, &[0xac], none).expect("sighash"));
    assert_eq!(base_single, signature_hash(&changed, 0, &[0xac], single).expect("sighash"));

    changed.vout[0].value = 999;
    assert_ne!(base_single, signature_hash(&changed, 0, &[0xac], single).expect("sighash"));
}

#[test]
fn single_without_matching_output_is_an_error() {
    let mut tx = two_in_two_out();
    tx.vout.truncate(1);
    assert_eq!(
        signature_hash(&tx, 1, &[0xac], SighashType(SIGHASH_SINGLE)),
        Err(SighashError::MissingOutput)
    );
    assert_eq!(
        signature_hash(&tx, 5, &[0xac], SighashType(SIGHASH_ALL)),
        Err(SighashError::InputIndexOutOfRange)
    );
}
