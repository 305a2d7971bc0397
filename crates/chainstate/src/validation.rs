//! Ordered block checks.
//!
//! The engine runs these in a fixed order and stops at the first failure:
//! structure, proof of work, merkle commitment, checkpoint, then the
//! contextual input checks that resolve every spend against the ledger.
//! Script execution follows in [`crate::scriptpool`].

use std::collections::{HashMap, HashSet};

use ledgerd_consensus::constants::{
    LOCKTIME_THRESHOLD, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE,
    MAX_COINBASE_SCRIPT_SIZE, MAX_FUTURE_BLOCK_TIME, MIN_COINBASE_SCRIPT_SIZE,
};
use ledgerd_consensus::money::{money_range, Amount};
use ledgerd_consensus::{block_subsidy, CheckpointTable, ConsensusParams, Hash256};
use ledgerd_pow::difficulty::next_work_required;
use ledgerd_pow::validation::validate_pow_contextual;
use ledgerd_pow::HeaderInfo;
use ledgerd_primitives::hash::sha256d;
use ledgerd_primitives::transaction::SEQUENCE_FINAL;
use ledgerd_primitives::{Block, BlockHeader, OutPoint, Transaction};
use ledgerd_script::instruction::push_data;
use ledgerd_script::{legacy_sigop_count, num};
use ledgerd_storage::StoreError;

use crate::error::{
    ChainStateError, RejectReason, MERKLE_MISMATCH, MERKLE_MUTATED, TIME_TOO_NEW,
};
use crate::ledger::{OutPointKey, UtxoEntry};
use crate::scriptpool::ScriptCheck;
use crate::undo::{BlockUndo, SpentOutput};

/// Where a block sits relative to the chain it extends.
#[derive(Clone, Copy, Debug)]
pub struct BlockContext {
    pub height: i32,
    /// Median time past of the parent; `None` for genesis.
    pub median_time_past: Option<i64>,
    /// Adjusted local clock, unix seconds.
    pub now: i64,
}

/// Everything the ledger and the script pool need to connect a block.
#[derive(Debug, Default)]
pub struct ConnectPlan {
    pub undo: BlockUndo,
    pub script_checks: Vec<ScriptCheck>,
    pub fees: Amount,
}

/// Context-free transaction rules.
pub fn check_transaction(tx: &Transaction) -> Result<(), RejectReason> {
    if tx.vin.is_empty() {
        return Err(RejectReason::structural("bad-txns-vin-empty"));
    }
    if tx.vout.is_empty() {
        return Err(RejectReason::structural("bad-txns-vout-empty"));
    }
    if tx.serialized_size() > MAX_BLOCK_SIZE as usize {
        return Err(RejectReason::structural("bad-txns-oversize"));
    }

    let mut value_out: Amount = 0;
    for output in &tx.vout {
        if output.value < 0 {
            return Err(RejectReason::structural("bad-txns-vout-negative"));
        }
        if !money_range(output.value) {
            return Err(RejectReason::structural("bad-txns-vout-toolarge"));
        }
        value_out = value_out
            .checked_add(output.value)
            .filter(|total| money_range(*total))
            .ok_or(RejectReason::structural("bad-txns-txouttotal-toolarge"))?;
    }

    let mut seen = HashSet::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if !seen.insert(OutPointKey::new(&input.prevout)) {
            return Err(RejectReason::structural("bad-txns-inputs-duplicate"));
        }
    }

    if tx.is_coinbase() {
        let len = tx.vin[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&len) {
            return Err(RejectReason::structural("bad-cb-length"));
        }
    } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(RejectReason::structural("bad-txns-prevout-null"));
    }
    Ok(())
}

pub fn is_final_tx(tx: &Transaction, height: i32, block_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let lock_time = i64::from(tx.lock_time);
    let compare = if tx.lock_time < LOCKTIME_THRESHOLD {
        i64::from(height)
    } else {
        block_time
    };
    if lock_time < compare {
        return true;
    }
    tx.vin.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Script prefix a coinbase must start with at `height`.
pub fn coinbase_height_script(height: i32) -> Vec<u8> {
    match height {
        0 => vec![0x00],
        1..=16 => vec![0x50 + height as u8],
        _ => push_data(&num::encode(i64::from(height))),
    }
}

fn block_sigops(block: &Block) -> usize {
    block
        .transactions
        .iter()
        .map(|tx| {
            let inputs: usize = tx
                .vin
                .iter()
                .map(|input| legacy_sigop_count(&input.script_sig, false))
                .sum();
            let outputs: usize = tx
                .vout
                .iter()
                .map(|output| legacy_sigop_count(&output.script_pubkey, false))
                .sum();
            inputs + outputs
        })
        .sum()
}

/// Step 1: shape, size, timestamps, per-transaction rules and sigops.
pub fn check_block_structure(
    block: &Block,
    block_size: usize,
    context: &BlockContext,
) -> Result<(), RejectReason> {
    let Some(coinbase) = block.transactions.first() else {
        return Err(RejectReason::structural("bad-blk-length"));
    };
    if !coinbase.is_coinbase() {
        return Err(RejectReason::structural("bad-cb-missing"));
    }
    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return Err(RejectReason::structural("bad-cb-multiple"));
    }
    if block_size > MAX_BLOCK_SIZE as usize {
        return Err(RejectReason::structural("bad-blk-length"));
    }

    let block_time = i64::from(block.header.time);
    if block_time > context.now + MAX_FUTURE_BLOCK_TIME {
        return Err(RejectReason::structural(TIME_TOO_NEW));
    }
    if let Some(median) = context.median_time_past {
        if block_time <= median {
            return Err(RejectReason::structural("time-too-old"));
        }
    }

    for tx in &block.transactions {
        check_transaction(tx)?;
        if !is_final_tx(tx, context.height, block_time) {
            return Err(RejectReason::structural("bad-txns-nonfinal"));
        }
    }
    if context.height > 0
        && !coinbase.vin[0]
            .script_sig
            .starts_with(&coinbase_height_script(context.height))
    {
        return Err(RejectReason::structural("bad-cb-height"));
    }
    if block_sigops(block) > MAX_BLOCK_SIGOPS as usize {
        return Err(RejectReason::structural("bad-blk-sigops"));
    }
    Ok(())
}

/// Step 2: `bits` must match the retarget schedule and the hash must meet
/// the target. `parent_chain` is the parent's ancestry tail in height order.
pub fn check_proof_of_work(
    header: &BlockHeader,
    parent_chain: &[HeaderInfo],
    params: &ConsensusParams,
) -> Result<(), RejectReason> {
    let expected = next_work_required(parent_chain, params)
        .map_err(|_| RejectReason::ProofOfWorkInvalid("bad-diffbits".into()))?;
    validate_pow_contextual(header, expected, params)
        .map_err(|err| RejectReason::ProofOfWorkInvalid(err.code().into()))
}

/// Merkle root of `txids` and whether the last pair of some level was a
/// duplicate, which lets two different transaction lists share a root.
pub fn merkle_root(txids: &[Hash256]) -> (Hash256, bool) {
    if txids.is_empty() {
        return ([0u8; 32], false);
    }
    let mut layer = txids.to_vec();
    let mut mutated = false;
    while layer.len() > 1 {
        let size = layer.len();
        let mut next = Vec::with_capacity(size.div_ceil(2));
        let mut i = 0usize;
        while i < size {
            let i2 = if i + 1 < size { i + 1 } else { i };
            if i2 == i + 1 && i2 + 1 == size && layer[i] == layer[i2] {
                mutated = true;
            }
            let mut data = [0u8; 64];
            data[..32].copy_from_slice(&layer[i]);
            data[32..].copy_from_slice(&layer[i2]);
            next.push(sha256d(&data));
            i += 2;
        }
        layer = next;
    }
    (layer[0], mutated)
}

/// Step 3.
pub fn check_merkle_root(block: &Block, txids: &[Hash256]) -> Result<(), RejectReason> {
    let (root, mutated) = merkle_root(txids);
    if mutated {
        return Err(RejectReason::structural(MERKLE_MUTATED));
    }
    if root != block.header.merkle_root {
        return Err(RejectReason::structural(MERKLE_MISMATCH));
    }
    Ok(())
}

/// Step 4.
pub fn check_checkpoint(
    checkpoints: &CheckpointTable,
    height: i32,
    hash: &Hash256,
) -> Result<(), RejectReason> {
    if checkpoints.check_block(height, hash) {
        Ok(())
    } else {
        Err(RejectReason::CheckpointMismatch { height })
    }
}

/// Resolves spends against committed entries plus outputs created earlier in
/// the same block.
struct SpendView<F> {
    lookup: F,
    maturity: i32,
    pending: HashMap<OutPointKey, UtxoEntry>,
    spent: HashSet<OutPointKey>,
}

impl<F> SpendView<F>
where
    F: FnMut(&OutPoint) -> Result<Option<UtxoEntry>, StoreError>,
{
    fn new(lookup: F, maturity: i32) -> Self {
        Self {
            lookup,
            maturity,
            pending: HashMap::new(),
            spent: HashSet::new(),
        }
    }

    fn add_outputs(&mut self, tx: &Transaction, txid: Hash256, height: i32) {
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.vout.iter().enumerate() {
            self.pending.insert(
                OutPointKey::new(&OutPoint::new(txid, index as u32)),
                UtxoEntry {
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    height: height.max(0) as u32,
                    is_coinbase,
                },
            );
        }
    }

    /// Spend every input of `tx`, recording consumed ledger entries in
    /// `undo` and queueing one script check per input. Returns the fee.
    fn spend(
        &mut self,
        tx: &Transaction,
        tx_index: usize,
        height: i32,
        undo: &mut BlockUndo,
        script_checks: &mut Vec<ScriptCheck>,
    ) -> Result<Amount, ChainStateError> {
        let mut value_in: Amount = 0;
        for (input_index, input) in tx.vin.iter().enumerate() {
            let key = OutPointKey::new(&input.prevout);
            if !self.spent.insert(key) {
                return Err(RejectReason::utxo("bad-txns-double-spend").into());
            }
            let entry = match self.pending.get(&key) {
                Some(entry) => entry.clone(),
                None => match (self.lookup)(&input.prevout)? {
                    Some(entry) => {
                        undo.spent.push(SpentOutput {
                            outpoint: input.prevout,
                            entry: entry.clone(),
                        });
                        entry
                    }
                    None => {
                        return Err(RejectReason::utxo("bad-txns-inputs-missingorspent").into())
                    }
                },
            };
            if entry.is_coinbase && height - (entry.height as i32) < self.maturity {
                return Err(RejectReason::utxo("bad-txns-premature-spend-of-coinbase").into());
            }
            value_in = value_in
                .checked_add(entry.value)
                .filter(|total| money_range(entry.value) && money_range(*total))
                .ok_or(RejectReason::structural("bad-txns-inputvalues-outofrange"))?;
            script_checks.push(ScriptCheck {
                tx_index,
                input_index,
                script_pubkey: entry.script_pubkey,
                amount: entry.value,
            });
        }
        let value_out = tx
            .value_out()
            .ok_or(RejectReason::structural("bad-txns-txouttotal-toolarge"))?;
        if value_in < value_out {
            return Err(RejectReason::structural("bad-txns-in-belowout").into());
        }
        Ok(value_in - value_out)
    }
}

/// Step 5: resolve every input of `block` at `height`.
pub fn check_inputs<F>(
    block: &Block,
    txids: &[Hash256],
    height: i32,
    lookup: F,
    params: &ConsensusParams,
) -> Result<ConnectPlan, ChainStateError>
where
    F: FnMut(&OutPoint) -> Result<Option<UtxoEntry>, StoreError>,
{
    let mut view = SpendView::new(lookup, params.coinbase_maturity);

    let mut seen = HashSet::with_capacity(txids.len());
    for (tx, txid) in block.transactions.iter().zip(txids) {
        if !seen.insert(*txid) {
            return Err(RejectReason::utxo("bad-txns-duplicate").into());
        }
        for index in 0..tx.vout.len() {
            if (view.lookup)(&OutPoint::new(*txid, index as u32))?.is_some() {
                return Err(RejectReason::utxo("bad-txns-BIP30").into());
            }
        }
    }

    let mut plan = ConnectPlan::default();
    for (tx_index, (tx, txid)) in block.transactions.iter().zip(txids).enumerate() {
        if tx_index > 0 {
            let fee = view.spend(tx, tx_index, height, &mut plan.undo, &mut plan.script_checks)?;
            plan.fees = plan
                .fees
                .checked_add(fee)
                .filter(|total| money_range(*total))
                .ok_or(RejectReason::structural("bad-txns-fee-outofrange"))?;
        }
        view.add_outputs(tx, *txid, height);
    }

    let coinbase_out = block
        .transactions
        .first()
        .and_then(Transaction::value_out)
        .ok_or(RejectReason::structural("bad-txns-txouttotal-toolarge"))?;
    if coinbase_out > block_subsidy(height, params) + plan.fees {
        return Err(RejectReason::structural("bad-cb-amount").into());
    }
    Ok(plan)
}

/// Validate a loose transaction as if it were mined in the next block.
/// Returns its fee and the script checks it needs.
pub fn check_transaction_inputs<F>(
    tx: &Transaction,
    spend_height: i32,
    lookup: F,
    params: &ConsensusParams,
) -> Result<(Amount, Vec<ScriptCheck>), ChainStateError>
where
    F: FnMut(&OutPoint) -> Result<Option<UtxoEntry>, StoreError>,
{
    check_transaction(tx)?;
    if tx.is_coinbase() {
        return Err(RejectReason::structural("bad-tx-coinbase").into());
    }
    let mut view = SpendView::new(lookup, params.coinbase_maturity);
    let mut undo = BlockUndo::default();
    let mut checks = Vec::with_capacity(tx.vin.len());
    let fee = view.spend(tx, 0, spend_height, &mut undo, &mut checks)?;
    Ok((fee, checks))
}
