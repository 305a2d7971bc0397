//! Pinned (height, hash) pairs that veto divergent histories.
//!
//! The table never contributes to work comparison. It is consulted when a
//! block at a pinned height is connected, and for the sync progress
//! estimates reported to operators.

use crate::params::{Checkpoint, ConsensusParams};
use crate::Hash256;

/// How many times slower transactions after the last checkpoint are expected
/// to verify, since their scripts are not skipped.
pub const SIGCHECK_VERIFICATION_FACTOR: f64 = 5.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckpointData {
    pub time_last_checkpoint: i64,
    pub transactions_last_checkpoint: u64,
    pub transactions_per_day: f64,
}

#[derive(Clone, Debug)]
pub struct CheckpointTable {
    entries: Vec<Checkpoint>,
    data: CheckpointData,
    enabled: bool,
}

impl CheckpointTable {
    pub fn new(mut entries: Vec<Checkpoint>, data: CheckpointData) -> Self {
        entries.sort_by_key(|checkpoint| checkpoint.height);
        entries.dedup_by_key(|checkpoint| checkpoint.height);
        Self {
            entries,
            data,
            enabled: true,
        }
    }

    pub fn from_params(params: &ConsensusParams) -> Self {
        Self::new(params.checkpoints.clone(), params.checkpoint_data)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn entries(&self) -> &[Checkpoint] {
        &self.entries
    }

    pub fn data(&self) -> &CheckpointData {
        &self.data
    }

    pub fn pinned(&self, height: i32) -> Option<&Hash256> {
        self.entries
            .binary_search_by_key(&height, |checkpoint| checkpoint.height)
            .ok()
            .map(|pos| &self.entries[pos].hash)
    }

    /// False only when `height` is pinned to a different hash.
    pub fn check_block(&self, height: i32, hash: &Hash256) -> bool {
        if !self.enabled {
            return true;
        }
        match self.pinned(height) {
            Some(pinned) => pinned == hash,
            None => true,
        }
    }

    /// Height of the last pin, or 0 when checkpoints are off.
    pub fn total_blocks_estimate(&self) -> i32 {
        if !self.enabled {
            return 0;
        }
        self.entries
            .last()
            .map(|checkpoint| checkpoint.height)
            .unwrap_or(0)
    }

    /// Highest pin whose block is already known to the caller.
    pub fn last_checkpoint<F>(&self, mut is_known: F) -> Option<Checkpoint>
    where
        F: FnMut(&Hash256) -> bool,
    {
        if !self.enabled {
            return None;
        }
        self.entries
            .iter()
            .rev()
            .find(|checkpoint| is_known(&checkpoint.hash))
            .copied()
    }

    pub fn latest_hardened(&self) -> Option<&Checkpoint> {
        self.entries.last()
    }

    /// Rough fraction of total verification work done once a block with
    /// cumulative `chain_tx` transactions and timestamp `block_time` is
    /// connected, given the current time `now`.
    pub fn guess_verification_progress(&self, chain_tx: u64, block_time: i64, now: i64) -> f64 {
        let data = &self.data;
        let (work_before, work_after) = if chain_tx <= data.transactions_last_checkpoint {
            let cheap_before = chain_tx as f64;
            let cheap_after = (data.transactions_last_checkpoint - chain_tx) as f64;
            let expensive_after = (now - data.time_last_checkpoint) as f64 / SECONDS_PER_DAY
                * data.transactions_per_day;
            (
                cheap_before,
                cheap_after + expensive_after * SIGCHECK_VERIFICATION_FACTOR,
            )
        } else {
            let cheap_before = data.transactions_last_checkpoint as f64;
            let expensive_before = (chain_tx - data.transactions_last_checkpoint) as f64;
            let expensive_after =
                (now - block_time) as f64 / SECONDS_PER_DAY * data.transactions_per_day;
            (
                cheap_before + expensive_before * SIGCHECK_VERIFICATION_FACTOR,
                expensive_after * SIGCHECK_VERIFICATION_FACTOR,
            )
        };
        let total = work_before + work_after;
        if total <= 0.0 {
            return 1.0;
        }
        (work_before / total).clamp(0.0, 1.0)
    }
}
