//! Block submission, chain selection and the read-side API.
//!
//! All ledger-mutating work runs under one mutex. Readers go straight to the
//! committed store or to the tip snapshot, which is replaced only after the
//! batch that moved the tip has been written.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use ledgerd_consensus::money::Amount;
use ledgerd_consensus::params::hash256_to_hex;
use ledgerd_consensus::{Checkpoint, CheckpointTable, ConsensusParams, Hash256};
use ledgerd_pow::retarget_window;
use ledgerd_primitives::{Block, OutPoint, Transaction};
use ledgerd_script::BLOCK_SCRIPT_VERIFY_FLAGS;
use ledgerd_storage::{Column, KeyValueStore, StoreError, WriteBatch};
use primitive_types::U256;

use crate::blockindex::{BlockIndex, BlockNode, BlockStatus};
use crate::error::{ChainStateError, EngineError, RejectReason, BAD_PREVBLK};
use crate::ledger::{Ledger, StagedLedger, UtxoEntry};
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot};
use crate::scriptpool::ScriptPool;
use crate::validation::{
    check_block_structure, check_checkpoint, check_inputs, check_merkle_root,
    check_proof_of_work, check_transaction_inputs, is_final_tx, BlockContext,
};

pub const META_BEST_BLOCK_KEY: &[u8] = b"best_block";
pub const META_GENESIS_KEY: &[u8] = b"genesis";

pub const DEFAULT_MAX_ORPHANS: usize = 100;

const ZERO_HASH: Hash256 = [0u8; 32];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: Hash256,
    pub height: i32,
    pub chainwork: U256,
}

impl ChainTip {
    fn from_node(node: &BlockNode) -> Self {
        Self {
            hash: node.hash,
            height: node.height,
            chainwork: node.chainwork,
        }
    }
}

/// Sent once per `submit_block` call that moved the active tip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TipChanged {
    pub old: Option<ChainTip>,
    pub new: ChainTip,
    /// Blocks removed from the active chain, tip first.
    pub disconnected: Vec<Hash256>,
    /// Blocks added to the active chain, in height order.
    pub connected: Vec<Hash256>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { tip_changed: bool },
    AlreadyKnown(BlockStatus),
    Rejected(RejectReason),
    /// The block was valid on its own, but `ancestor` failed to connect while
    /// switching to its branch. The block is rejected with `bad-prevblk`;
    /// `reason` is the ancestor's verdict.
    AncestorRejected {
        ancestor: Hash256,
        reason: RejectReason,
    },
    /// Parent unknown; held until the parent arrives.
    Orphaned,
}

#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Script verifier threads; `None` uses the available parallelism.
    pub script_threads: Option<usize>,
    pub checkpoints_enabled: bool,
    pub script_flags: u32,
    pub max_orphans: usize,
    /// Local clock in unix seconds.
    pub clock: fn() -> i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            script_threads: None,
            checkpoints_enabled: true,
            script_flags: BLOCK_SCRIPT_VERIFY_FLAGS,
            max_orphans: DEFAULT_MAX_ORPHANS,
            clock: system_time,
        }
    }
}

pub fn system_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

struct Orphan {
    block: Block,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct OrphanPool {
    blocks: HashMap<Hash256, Orphan>,
    by_parent: HashMap<Hash256, Vec<Hash256>>,
    order: VecDeque<Hash256>,
}

impl OrphanPool {
    fn insert(&mut self, hash: Hash256, orphan: Orphan, limit: usize) {
        if self.blocks.contains_key(&hash) || limit == 0 {
            return;
        }
        while self.blocks.len() >= limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.remove(&oldest);
        }
        self.by_parent
            .entry(orphan.block.header.prev_block)
            .or_default()
            .push(hash);
        self.order.push_back(hash);
        self.blocks.insert(hash, orphan);
    }

    fn remove(&mut self, hash: &Hash256) -> Option<Orphan> {
        let orphan = self.blocks.remove(hash)?;
        let parent = orphan.block.header.prev_block;
        if let Some(siblings) = self.by_parent.get_mut(&parent) {
            siblings.retain(|sibling| sibling != hash);
            if siblings.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
        self.order.retain(|queued| queued != hash);
        Some(orphan)
    }

    fn take_children(&mut self, parent: &Hash256) -> Vec<Orphan> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        children
            .iter()
            .filter_map(|child| {
                self.order.retain(|queued| queued != child);
                self.blocks.remove(child)
            })
            .collect()
    }
}

struct EngineState {
    index: BlockIndex,
    verdicts: HashMap<Hash256, RejectReason>,
    orphans: OrphanPool,
    genesis: Option<Hash256>,
}

/// A block on a candidate branch that failed full validation.
struct ConnectFailure {
    block: Hash256,
    reason: RejectReason,
}

/// What happened to a block before chain selection ran.
enum Admission {
    Indexed,
    Done(SubmitOutcome),
}

pub struct Engine<S> {
    store: Arc<S>,
    ledger: Ledger<Arc<S>>,
    params: ConsensusParams,
    checkpoints: CheckpointTable,
    pool: ScriptPool,
    options: EngineOptions,
    state: Mutex<EngineState>,
    tip: RwLock<Option<ChainTip>>,
    subscribers: Mutex<Vec<Sender<TipChanged>>>,
    halted: AtomicBool,
    metrics: EngineMetrics,
}

impl<S: KeyValueStore> Engine<S> {
    /// Open the engine on `store`, rebuilding the block index and the active
    /// tip from what was committed.
    pub fn open(
        store: Arc<S>,
        params: ConsensusParams,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        let checkpoints =
            CheckpointTable::from_params(&params).with_enabled(options.checkpoints_enabled);
        let pool = ScriptPool::new(options.script_threads)?;

        let mut index = BlockIndex::new();
        store.for_each_prefix(Column::BlockIndex, &[], &mut |key, value| {
            let hash: Hash256 = key
                .try_into()
                .map_err(|_| StoreError::Backend("invalid block index key".to_string()))?;
            let node = BlockNode::decode(hash, value)
                .map_err(|err| StoreError::Backend(format!("invalid block node: {err}")))?;
            index.insert(node);
            Ok(())
        })?;

        let genesis = match store.get(Column::Meta, META_GENESIS_KEY)? {
            Some(bytes) => Some(
                Hash256::try_from(bytes.as_slice())
                    .map_err(|_| EngineError::CorruptIndex("invalid genesis pin"))?,
            ),
            None => None,
        };
        let tip = match store.get(Column::Meta, META_BEST_BLOCK_KEY)? {
            Some(bytes) => {
                let hash = Hash256::try_from(bytes.as_slice())
                    .map_err(|_| EngineError::CorruptIndex("invalid best block"))?;
                let node = index
                    .get(&hash)
                    .ok_or(EngineError::CorruptIndex("best block missing from index"))?;
                Some(ChainTip::from_node(node))
            }
            None => None,
        };

        ledgerd_log::log_info!(
            "block index loaded: {} nodes, tip {}",
            index.len(),
            tip.as_ref()
                .map(|tip| format!("{} at height {}", hash256_to_hex(&tip.hash), tip.height))
                .unwrap_or_else(|| "none".to_string())
        );

        let engine = Self {
            ledger: Ledger::new(Arc::clone(&store)),
            store,
            params,
            checkpoints,
            pool,
            options,
            state: Mutex::new(EngineState {
                index,
                verdicts: HashMap::new(),
                orphans: OrphanPool::default(),
                genesis,
            }),
            tip: RwLock::new(tip),
            subscribers: Mutex::new(Vec::new()),
            halted: AtomicBool::new(false),
            metrics: EngineMetrics::default(),
        };

        // Finish a chain switch an earlier process did not complete.
        {
            let mut state = engine.lock_state()?;
            engine.activate_best_chain(&mut state)?;
        }
        Ok(engine)
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn checkpoints(&self) -> &CheckpointTable {
        &self.checkpoints
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> EngineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of times the script verifier pool has been asked to run.
    pub fn script_pool_invocations(&self) -> u64 {
        self.pool.invocations()
    }

    pub fn get_best_tip(&self) -> Option<ChainTip> {
        self.tip
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, EngineError> {
        Ok(self.ledger.lookup(outpoint)?)
    }

    pub fn block_status(&self, hash: &Hash256) -> Result<BlockStatus, EngineError> {
        let state = self.lock_state()?;
        Ok(state
            .index
            .get(hash)
            .map(|node| node.status)
            .unwrap_or(BlockStatus::Unknown))
    }

    /// Receive one [`TipChanged`] per call that moved the active tip.
    pub fn subscribe(&self) -> Receiver<TipChanged> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sender);
        receiver
    }

    /// Highest checkpoint whose block is in the index.
    pub fn last_checkpoint(&self) -> Result<Option<Checkpoint>, EngineError> {
        let state = self.lock_state()?;
        Ok(self
            .checkpoints
            .last_checkpoint(|hash| state.index.contains(hash)))
    }

    pub fn verification_progress(&self) -> Result<f64, EngineError> {
        let Some(tip) = self.get_best_tip() else {
            return Ok(0.0);
        };
        let state = self.lock_state()?;
        let node = state
            .index
            .get(&tip.hash)
            .ok_or(EngineError::CorruptIndex("tip missing from index"))?;
        Ok(self.checkpoints.guess_verification_progress(
            node.chain_tx,
            i64::from(node.time),
            (self.options.clock)(),
        ))
    }

    /// Check `tx` as a spend in the block after the current tip, against the
    /// committed ledger. Nothing is written.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<Amount, ChainStateError> {
        let _state = self
            .state
            .lock()
            .map_err(|_| ChainStateError::CorruptIndex("engine lock poisoned"))?;
        let height = self.get_best_tip().map_or(0, |tip| tip.height + 1);
        if !is_final_tx(tx, height, (self.options.clock)()) {
            return Err(RejectReason::structural("bad-txns-nonfinal").into());
        }
        let (fee, checks) = check_transaction_inputs(
            tx,
            height,
            |outpoint| self.ledger.lookup(outpoint),
            &self.params,
        )?;
        self.pool
            .verify(std::slice::from_ref(tx), &checks, self.options.script_flags)
            .map_err(|failure| ChainStateError::Reject(failure.into_reject()))?;
        Ok(fee)
    }

    /// Decode, validate and, when it extends the heaviest chain, connect a
    /// block.
    ///
    /// Consensus verdicts come back as `Ok(SubmitOutcome::Rejected)`. An
    /// `Err` means the engine itself failed; after a ledger I/O failure every
    /// later call returns [`EngineError::Halted`] until the engine is
    /// reopened.
    pub fn submit_block(&self, bytes: &[u8]) -> Result<SubmitOutcome, EngineError> {
        if self.is_halted() {
            return Err(EngineError::Halted);
        }
        self.metrics.record_submitted();

        let block = match Block::consensus_decode(bytes) {
            Ok(block) => block,
            Err(err) => {
                ledgerd_log::log_debug!("undecodable block: {err}");
                self.metrics.record_rejected();
                return Ok(SubmitOutcome::Rejected(RejectReason::MalformedEncoding(
                    err.to_string().into(),
                )));
            }
        };
        let hash = block.header.hash();
        let txids = block.txids();

        let mut state = self.lock_state()?;
        if self.is_halted() {
            return Err(EngineError::Halted);
        }
        let old_tip = self.get_best_tip();

        let (outcome, failures) = self
            .submit_locked(&mut state, block, bytes.to_vec(), hash, &txids)
            .map_err(|err| self.fatal(err))?;

        let new_tip = self.get_best_tip();
        let tip_changed =
            old_tip.as_ref().map(|tip| tip.hash) != new_tip.as_ref().map(|tip| tip.hash);
        if let (true, Some(new_tip)) = (tip_changed, new_tip) {
            self.notify(&state, old_tip, new_tip);
        }

        Ok(match outcome {
            Admission::Done(outcome) => {
                if matches!(outcome, SubmitOutcome::Rejected(_)) {
                    self.metrics.record_rejected();
                }
                outcome
            }
            Admission::Indexed => match state.index.get(&hash).map(|node| node.status) {
                Some(BlockStatus::Rejected) => {
                    self.metrics.record_rejected();
                    let failure = failures.into_iter().find(|failure| {
                        state.index.find_fork(&failure.block, &hash) == Some(failure.block)
                    });
                    match failure {
                        Some(failure) if failure.block == hash => {
                            SubmitOutcome::Rejected(failure.reason)
                        }
                        Some(failure) => SubmitOutcome::AncestorRejected {
                            ancestor: failure.block,
                            reason: failure.reason,
                        },
                        None => SubmitOutcome::Rejected(
                            state
                                .verdicts
                                .get(&hash)
                                .cloned()
                                .unwrap_or_else(|| RejectReason::structural(BAD_PREVBLK)),
                        ),
                    }
                }
                _ => SubmitOutcome::Accepted { tip_changed },
            },
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EngineState>, EngineError> {
        self.state.lock().map_err(|_| EngineError::Poisoned)
    }

    fn fatal(&self, err: EngineError) -> EngineError {
        if let EngineError::LedgerIo(store_err) = &err {
            self.halted.store(true, Ordering::Release);
            ledgerd_log::log_error!("ledger write failed, halting: {store_err}");
        }
        err
    }

    fn set_tip(&self, tip: Option<ChainTip>) {
        *self
            .tip
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tip;
    }

    fn submit_locked(
        &self,
        state: &mut EngineState,
        block: Block,
        bytes: Vec<u8>,
        hash: Hash256,
        txids: &[Hash256],
    ) -> Result<(Admission, Vec<ConnectFailure>), EngineError> {
        let admission = self.admit_block(state, &block, &bytes, hash, txids)?;
        let mut failures = Vec::new();
        if matches!(admission, Admission::Indexed) {
            self.admit_orphans(state, hash)?;
            failures = self.activate_best_chain(state)?;
        } else if matches!(admission, Admission::Done(SubmitOutcome::Orphaned)) {
            state
                .orphans
                .insert(hash, Orphan { block, bytes }, self.options.max_orphans);
        }
        Ok((admission, failures))
    }

    /// Run the header-level checks and index the block. Nothing here touches
    /// the ledger.
    fn admit_block(
        &self,
        state: &mut EngineState,
        block: &Block,
        bytes: &[u8],
        hash: Hash256,
        txids: &[Hash256],
    ) -> Result<Admission, EngineError> {
        if let Some(node) = state.index.get(&hash) {
            if node.status != BlockStatus::Rejected {
                return Ok(Admission::Done(SubmitOutcome::AlreadyKnown(node.status)));
            }
        }
        if let Some(reason) = self.cached_verdict(state, &hash)? {
            self.metrics.record_cache_hit();
            return Ok(Admission::Done(SubmitOutcome::Rejected(reason)));
        }
        if state.orphans.blocks.contains_key(&hash) {
            return Ok(Admission::Done(SubmitOutcome::Orphaned));
        }
        self.metrics.record_validated();

        let prev = block.header.prev_block;
        let is_genesis = prev == ZERO_HASH;
        let parent = if is_genesis {
            let pinned = self.params.hash_genesis_block.or(state.genesis);
            if pinned.is_some_and(|pinned| pinned != hash) {
                let reason = RejectReason::structural("bad-genesis");
                self.cache_verdict(state, hash, reason.clone())?;
                return Ok(Admission::Done(SubmitOutcome::Rejected(reason)));
            }
            None
        } else {
            let Some(parent) = state.index.get(&prev).cloned() else {
                return Ok(Admission::Done(SubmitOutcome::Orphaned));
            };
            if parent.status == BlockStatus::Rejected {
                let reason = RejectReason::structural(BAD_PREVBLK);
                self.index_rejected(state, hash, block, reason.clone())?;
                return Ok(Admission::Done(SubmitOutcome::Rejected(reason)));
            }
            Some(parent)
        };

        let height = parent.as_ref().map_or(0, |parent| parent.height + 1);
        let checked =
            self.check_header_level(state, block, bytes.len(), &hash, txids, parent.as_ref());
        if let Err(reason) = checked {
            ledgerd_log::log_debug!(
                "block {} at height {height} rejected: {reason}",
                hash256_to_hex(&hash)
            );
            if reason.is_permanent() {
                self.index_rejected(state, hash, block, reason.clone())?;
            }
            return Ok(Admission::Done(SubmitOutcome::Rejected(reason)));
        }

        let tx_count = block.transactions.len() as u32;
        state
            .index
            .add_header(hash, &block.header, tx_count, is_genesis)
            .ok_or(EngineError::CorruptIndex("parent vanished from index"))?;
        state.index.set_status(&hash, BlockStatus::DataReceived);
        state.index.set_status(&hash, BlockStatus::ContextuallyValid);
        let node = state
            .index
            .get(&hash)
            .ok_or(EngineError::CorruptIndex("indexed block missing"))?;

        let mut batch = WriteBatch::new();
        batch.put(Column::BlockIndex, hash.as_slice(), node.encode());
        batch.put(Column::BlockData, hash.as_slice(), bytes);
        if is_genesis && state.genesis.is_none() {
            batch.put(Column::Meta, META_GENESIS_KEY, hash.as_slice());
        }
        self.store.write_batch(&batch)?;
        if is_genesis {
            state.genesis = Some(hash);
        }
        Ok(Admission::Indexed)
    }

    /// Checks 1 to 4, in order.
    fn check_header_level(
        &self,
        state: &EngineState,
        block: &Block,
        block_size: usize,
        hash: &Hash256,
        txids: &[Hash256],
        parent: Option<&BlockNode>,
    ) -> Result<(), RejectReason> {
        let height = parent.map_or(0, |parent| parent.height + 1);
        let context = BlockContext {
            height,
            median_time_past: parent.and_then(|parent| state.index.median_time_past(&parent.hash)),
            now: (self.options.clock)(),
        };
        check_block_structure(block, block_size, &context)?;

        let parent_chain = match parent {
            Some(parent) => state.index.header_chain(
                &parent.hash,
                retarget_window(i64::from(height), &self.params),
            ),
            None => Vec::new(),
        };
        check_proof_of_work(&block.header, &parent_chain, &self.params)?;
        check_merkle_root(block, txids)?;
        check_checkpoint(&self.checkpoints, height, hash)
    }

    fn admit_orphans(&self, state: &mut EngineState, parent: Hash256) -> Result<(), EngineError> {
        let mut queue = vec![parent];
        while let Some(parent) = queue.pop() {
            for orphan in state.orphans.take_children(&parent) {
                let hash = orphan.block.header.hash();
                let txids = orphan.block.txids();
                ledgerd_log::log_debug!("processing orphan {}", hash256_to_hex(&hash));
                match self.admit_block(state, &orphan.block, &orphan.bytes, hash, &txids)? {
                    Admission::Indexed => queue.push(hash),
                    Admission::Done(SubmitOutcome::Rejected(reason)) if reason.is_permanent() => {
                        // Its own orphans are rejected on sight.
                        queue.push(hash);
                    }
                    Admission::Done(_) => {}
                }
            }
        }
        Ok(())
    }

    fn cached_verdict(
        &self,
        state: &mut EngineState,
        hash: &Hash256,
    ) -> Result<Option<RejectReason>, StoreError> {
        if let Some(reason) = state.verdicts.get(hash) {
            return Ok(Some(reason.clone()));
        }
        let Some(bytes) = self.store.get(Column::Verdict, hash)? else {
            return Ok(None);
        };
        let reason = RejectReason::decode(&bytes)
            .map_err(|err| StoreError::Backend(format!("invalid cached verdict: {err}")))?;
        state.verdicts.insert(*hash, reason.clone());
        Ok(Some(reason))
    }

    fn cache_verdict(
        &self,
        state: &mut EngineState,
        hash: Hash256,
        reason: RejectReason,
    ) -> Result<(), StoreError> {
        self.store.put(Column::Verdict, &hash, &reason.encode())?;
        state.verdicts.insert(hash, reason);
        Ok(())
    }

    /// Index a block that failed before it could become valid.
    fn index_rejected(
        &self,
        state: &mut EngineState,
        hash: Hash256,
        block: &Block,
        reason: RejectReason,
    ) -> Result<(), StoreError> {
        let is_genesis = block.header.prev_block == ZERO_HASH;
        let tx_count = block.transactions.len() as u32;
        if state
            .index
            .add_header(hash, &block.header, tx_count, is_genesis)
            .is_none()
        {
            return self.cache_verdict(state, hash, reason);
        }
        self.reject_indexed(state, &hash, reason)
    }

    /// Mark an indexed block and everything built on it as rejected.
    fn reject_indexed(
        &self,
        state: &mut EngineState,
        hash: &Hash256,
        reason: RejectReason,
    ) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        let mut rejected = vec![(*hash, reason)];
        rejected.extend(
            state
                .index
                .descendants(hash)
                .into_iter()
                .map(|descendant| (descendant, RejectReason::structural(BAD_PREVBLK))),
        );
        for (hash, reason) in &rejected {
            state.index.set_status(hash, BlockStatus::Rejected);
            if let Some(node) = state.index.get(hash) {
                batch.put(Column::BlockIndex, hash.as_slice(), node.encode());
            }
            batch.put(Column::Verdict, hash.as_slice(), reason.encode());
        }
        self.store.write_batch(&batch)?;
        state.verdicts.extend(rejected);
        Ok(())
    }

    /// Switch to the heaviest valid chain, one candidate at a time, until no
    /// candidate has strictly more work than the active tip. Returns the
    /// blocks that failed to connect on the way.
    fn activate_best_chain(
        &self,
        state: &mut EngineState,
    ) -> Result<Vec<ConnectFailure>, EngineError> {
        let mut failures = Vec::new();
        loop {
            let Some(best) = state.index.best_candidate().cloned() else {
                return Ok(failures);
            };
            let current = self.get_best_tip();
            if let Some(tip) = &current {
                if best.hash == tip.hash || best.chainwork <= tip.chainwork {
                    return Ok(failures);
                }
            }
            if let Some(failure) = self.reorganize(state, current.as_ref(), &best)? {
                failures.push(failure);
            }
        }
    }

    /// Move the active chain from `current` to `target` in one commit.
    ///
    /// Disconnects and connects are staged against an in-memory view of the
    /// ledger, and every connect is fully validated against that view. The
    /// ledger batch, the new block statuses and the tip are published only
    /// after the whole branch has validated. A block that fails is rejected
    /// together with its descendants and nothing else is written.
    fn reorganize(
        &self,
        state: &mut EngineState,
        current: Option<&ChainTip>,
        target: &BlockNode,
    ) -> Result<Option<ConnectFailure>, EngineError> {
        let fork = match current {
            Some(tip) => Some(
                state
                    .index
                    .find_fork(&tip.hash, &target.hash)
                    .ok_or(EngineError::CorruptIndex("candidate does not share genesis"))?,
            ),
            None => None,
        };
        let mut disconnect = match current {
            Some(tip) => state.index.path(fork.as_ref(), &tip.hash),
            None => Vec::new(),
        };
        disconnect.reverse();
        let connect = state.index.path(fork.as_ref(), &target.hash);

        let mut staged = self.ledger.stage();
        let mut disconnect_times = Vec::with_capacity(disconnect.len());
        for hash in &disconnect {
            let start = Instant::now();
            self.stage_disconnect(state, &mut staged, hash)
                .map_err(engine_error)?;
            disconnect_times.push(start.elapsed());
        }

        let mut connected = Vec::with_capacity(connect.len());
        for hash in &connect {
            let start = Instant::now();
            match self.stage_connect(state, &mut staged, hash) {
                Ok(script_checks) => connected.push((*hash, start.elapsed(), script_checks)),
                Err(ChainStateError::Reject(reason)) => {
                    ledgerd_log::log_warn!(
                        "block {} failed to connect: {reason}",
                        hash256_to_hex(hash)
                    );
                    drop(staged);
                    self.reject_indexed(state, hash, reason.clone())?;
                    return Ok(Some(ConnectFailure {
                        block: *hash,
                        reason,
                    }));
                }
                Err(err) => return Err(engine_error(err)),
            }
        }

        let mut batch = staged.into_batch();
        for (hash, _, _) in &connected {
            let node = state
                .index
                .get(hash)
                .ok_or(EngineError::CorruptIndex("missing block node"))?;
            let mut node = node.clone();
            if node.status.can_become(BlockStatus::FullyValid) {
                node.status = BlockStatus::FullyValid;
            }
            batch.put(Column::BlockIndex, hash.as_slice(), node.encode());
        }
        batch.put(Column::Meta, META_BEST_BLOCK_KEY, target.hash.as_slice());
        self.store.write_batch(&batch)?;

        for (hash, _, _) in &connected {
            state.index.set_status(hash, BlockStatus::FullyValid);
        }
        self.set_tip(Some(ChainTip::from_node(target)));

        for elapsed in disconnect_times {
            self.metrics.record_disconnect(elapsed);
        }
        for (_, elapsed, script_checks) in &connected {
            self.metrics.record_connect(*elapsed, *script_checks);
        }
        if !disconnect.is_empty() {
            self.metrics.record_reorg();
            ledgerd_log::log_info!(
                "reorganized: {} blocks disconnected, {} connected, tip {} at height {}",
                disconnect.len(),
                connected.len(),
                hash256_to_hex(&target.hash),
                target.height
            );
        }
        Ok(None)
    }

    fn load_block(&self, hash: &Hash256) -> Result<Block, ChainStateError> {
        let bytes = self
            .store
            .get(Column::BlockData, hash)?
            .ok_or(ChainStateError::CorruptIndex("missing block data"))?;
        Block::consensus_decode(&bytes)
            .map_err(|_| ChainStateError::CorruptIndex("invalid stored block"))
    }

    /// Fully validate `hash` on top of the staged chain and stage its ledger
    /// effect. Returns the number of script checks run.
    fn stage_connect(
        &self,
        state: &EngineState,
        staged: &mut StagedLedger<'_, Arc<S>>,
        hash: &Hash256,
    ) -> Result<usize, ChainStateError> {
        let height = state
            .index
            .get(hash)
            .map(|node| node.height)
            .ok_or(ChainStateError::CorruptIndex("missing block node"))?;
        let block = self.load_block(hash)?;
        let txids = block.txids();

        let plan = check_inputs(
            &block,
            &txids,
            height,
            |outpoint| staged.lookup(outpoint),
            &self.params,
        )?;
        self.pool
            .verify(&block.transactions, &plan.script_checks, self.options.script_flags)
            .map_err(|failure| ChainStateError::Reject(failure.into_reject()))?;

        staged.apply_block(&block, hash, height, &plan.undo);
        ledgerd_log::log_debug!(
            "staged block {} at height {height} ({} txs, fees {})",
            hash256_to_hex(hash),
            block.transactions.len(),
            plan.fees
        );
        Ok(plan.script_checks.len())
    }

    /// Stage the removal of `hash`, the tip of the staged chain.
    fn stage_disconnect(
        &self,
        state: &EngineState,
        staged: &mut StagedLedger<'_, Arc<S>>,
        hash: &Hash256,
    ) -> Result<(), ChainStateError> {
        if !state.index.contains(hash) {
            return Err(ChainStateError::CorruptIndex("missing block node"));
        }
        let block = self.load_block(hash)?;
        let undo = staged
            .load_undo(hash)?
            .ok_or(ChainStateError::CorruptIndex("missing block undo"))?;
        staged.undo_block(&block, hash, &undo);
        ledgerd_log::log_debug!("staged disconnect of block {}", hash256_to_hex(hash));
        Ok(())
    }

    fn notify(&self, state: &EngineState, old: Option<ChainTip>, new: ChainTip) {
        let fork = old
            .as_ref()
            .and_then(|old| state.index.find_fork(&old.hash, &new.hash));
        let mut disconnected = match &old {
            Some(old) => state.index.path(fork.as_ref(), &old.hash),
            None => Vec::new(),
        };
        disconnected.reverse();
        let connected = state.index.path(fork.as_ref(), &new.hash);
        let event = TipChanged {
            old,
            new,
            disconnected,
            connected,
        };
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Map a failure outside of any verdict to the engine's error type.
fn engine_error(err: ChainStateError) -> EngineError {
    match err {
        ChainStateError::Store(err) => EngineError::LedgerIo(err),
        ChainStateError::CorruptIndex(message) => EngineError::CorruptIndex(message),
        ChainStateError::Reject(_) => EngineError::CorruptIndex("unexpected verdict"),
    }
}
