#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ledgerd_chainstate::engine::{Engine, EngineOptions};
use ledgerd_chainstate::validation::{coinbase_height_script, merkle_root};
use ledgerd_consensus::{block_subsidy, consensus_params, ConsensusParams, Hash256, Network};
use ledgerd_pow::{compact_to_target, hash_meets_target, target_to_compact};
use ledgerd_primitives::block::CURRENT_VERSION;
use ledgerd_primitives::transaction::SEQUENCE_FINAL;
use ledgerd_primitives::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};
use ledgerd_script::instruction::push_data;
use ledgerd_script::opcodes::OP_1;
use ledgerd_storage::memory::MemoryStore;
use ledgerd_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};

pub const GENESIS_TIME: u32 = 1_700_000_000;
pub const BLOCK_SPACING: u32 = 150;

pub fn fixed_clock() -> i64 {
    i64::from(GENESIS_TIME) + 10_000_000
}

pub fn regtest() -> ConsensusParams {
    consensus_params(Network::Regtest)
}

pub fn options() -> EngineOptions {
    EngineOptions {
        script_threads: Some(2),
        clock: fixed_clock,
        ..EngineOptions::default()
    }
}

pub fn open_engine<S: KeyValueStore>(store: Arc<S>, params: ConsensusParams) -> Engine<S> {
    Engine::open(store, params, options()).expect("open engine")
}

pub fn anyone_can_spend() -> Vec<u8> {
    vec![OP_1]
}

/// Coinbase paying the full subsidy plus `fees` to an anyone-can-spend
/// output. `tag` separates otherwise identical sibling blocks.
pub fn coinbase(params: &ConsensusParams, height: i32, tag: u8, fees: i64) -> Transaction {
    coinbase_paying(height, tag, block_subsidy(height, params) + fees, anyone_can_spend())
}

pub fn coinbase_paying(height: i32, tag: u8, value: i64, script_pubkey: Vec<u8>) -> Transaction {
    let mut script_sig = coinbase_height_script(height);
    script_sig.extend_from_slice(&push_data(&[tag, 0xc0]));
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: SEQUENCE_FINAL,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey,
        }],
        lock_time: 0,
    }
}

pub fn spend(prevouts: &[OutPoint], value: i64) -> Transaction {
    Transaction {
        version: 1,
        vin: prevouts
            .iter()
            .map(|prevout| TxIn {
                prevout: *prevout,
                script_sig: Vec::new(),
                sequence: SEQUENCE_FINAL,
            })
            .collect(),
        vout: vec![TxOut {
            value,
            script_pubkey: anyone_can_spend(),
        }],
        lock_time: 0,
    }
}

/// Grind the nonce until the header meets the regtest target.
pub fn grind(header: &mut BlockHeader) {
    let target = compact_to_target(header.bits).expect("regtest target");
    header.nonce = 0;
    while !hash_meets_target(&header.hash(), &target) {
        header.nonce += 1;
    }
}

pub fn mine(
    params: &ConsensusParams,
    prev_block: Hash256,
    height: i32,
    transactions: Vec<Transaction>,
) -> Block {
    let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
    let mut header = BlockHeader {
        version: CURRENT_VERSION,
        prev_block,
        merkle_root: merkle_root(&txids).0,
        time: GENESIS_TIME + height as u32 * BLOCK_SPACING,
        bits: target_to_compact(&params.pow_limit),
        nonce: 0,
    };
    grind(&mut header);
    Block {
        header,
        transactions,
    }
}

/// A chain of empty blocks. `blocks[h]` sits at height `base_height + h`.
pub struct ChainBuilder {
    pub params: ConsensusParams,
    pub blocks: Vec<Block>,
    base_height: i32,
    tag: u8,
}

impl ChainBuilder {
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            params,
            blocks: Vec::new(),
            base_height: 0,
            tag: 0,
        }
    }

    /// Continue from `blocks[..=height]` of `other`, tagging new coinbases
    /// with `tag`.
    pub fn fork(other: &ChainBuilder, height: i32, tag: u8) -> Self {
        Self {
            params: other.params.clone(),
            blocks: other.blocks[..=(height - other.base_height) as usize].to_vec(),
            base_height: other.base_height,
            tag,
        }
    }

    pub fn tip_height(&self) -> i32 {
        self.base_height + self.blocks.len() as i32 - 1
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.blocks
            .last()
            .map(|block| block.header.hash())
            .unwrap_or([0u8; 32])
    }

    pub fn block(&self, height: i32) -> &Block {
        &self.blocks[(height - self.base_height) as usize]
    }

    pub fn coinbase_outpoint(&self, height: i32) -> OutPoint {
        OutPoint::new(self.block(height).transactions[0].txid(), 0)
    }

    /// The block that would follow the tip, carrying `transactions` after
    /// a coinbase that collects `fees`.
    pub fn next_block(&self, fees: i64, transactions: Vec<Transaction>) -> Block {
        let height = self.tip_height() + 1;
        let mut txs = vec![coinbase(&self.params, height, self.tag, fees)];
        txs.extend(transactions);
        mine(&self.params, self.tip_hash(), height, txs)
    }

    pub fn push_with(&mut self, fees: i64, transactions: Vec<Transaction>) -> &Block {
        let block = self.next_block(fees, transactions);
        self.blocks.push(block);
        self.blocks.last().expect("just pushed")
    }

    pub fn push_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn extend(&mut self, count: usize) {
        for _ in 0..count {
            self.push_with(0, Vec::new());
        }
    }
}

pub fn submit_all<S: KeyValueStore>(engine: &Engine<S>, blocks: &[Block]) {
    use ledgerd_chainstate::SubmitOutcome;
    for block in blocks {
        let outcome = engine
            .submit_block(&block.consensus_encode())
            .expect("submit");
        assert!(
            matches!(outcome, SubmitOutcome::Accepted { .. }),
            "block at {:?} not accepted: {outcome:?}",
            block.header.hash()
        );
    }
}

/// Every committed ledger record outside of the block index and verdicts.
pub fn ledger_dump(store: &MemoryStore) -> Vec<(Column, Vec<u8>, Vec<u8>)> {
    store
        .dump()
        .expect("dump")
        .into_iter()
        .filter(|(column, _, _)| {
            matches!(column, Column::Utxo | Column::BlockUndo | Column::Meta)
        })
        .collect()
}

/// Store whose batch writes fail while `fail` is set.
pub struct FailingStore {
    pub inner: Arc<MemoryStore>,
    pub fail: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for FailingStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.inner.scan_prefix(column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.inner.for_each_prefix(column, prefix, visitor)
    }

    /// While failing, only batches that touch the UTXO set are refused, so
    /// indexing and verdict writes still go through.
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let touches_ledger = batch.touched_columns() & Column::Utxo.bit() != 0;
        if touches_ledger && self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.write_batch(batch)
    }
}
