//! Parallel script verification.
//!
//! Every input check of a block is independent and side-effect free, so the
//! checks fan out over a dedicated rayon pool. The first failure raises an
//! abort marker; checks that have not started yet are skipped and the
//! reported failure is the lowest-indexed one, so the verdict does not
//! depend on scheduling.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ledgerd_consensus::params::hash256_to_hex;
use ledgerd_primitives::Transaction;
use ledgerd_script::{verify_script, ScriptError};
use rayon::prelude::*;

use crate::error::{EngineError, RejectReason};

/// One input to verify, resolved against a ledger snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptCheck {
    pub tx_index: usize,
    pub input_index: usize,
    pub script_pubkey: Vec<u8>,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptFailure {
    pub tx_index: usize,
    pub input_index: usize,
    pub error: ScriptError,
}

impl ScriptFailure {
    pub fn into_reject(self) -> RejectReason {
        RejectReason::ScriptInvalid {
            reason: self.error.as_str().into(),
            resource_limit: self.error.is_resource_limit(),
        }
    }
}

pub struct ScriptPool {
    pool: rayon::ThreadPool,
    invocations: AtomicU64,
    checks_run: AtomicU64,
}

impl ScriptPool {
    /// `threads` defaults to the available parallelism.
    pub fn new(threads: Option<usize>) -> Result<Self, EngineError> {
        let threads = threads.filter(|threads| *threads > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|threads| threads.get())
                .unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("script-{index}"))
            .build()
            .map_err(|err| EngineError::ThreadPool(err.to_string()))?;
        Ok(Self {
            pool,
            invocations: AtomicU64::new(0),
            checks_run: AtomicU64::new(0),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Number of `verify` calls so far.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Number of individual checks actually executed.
    pub fn checks_run(&self) -> u64 {
        self.checks_run.load(Ordering::Relaxed)
    }

    /// Verify every check against `transactions`.
    pub fn verify(
        &self,
        transactions: &[Transaction],
        checks: &[ScriptCheck],
        flags: u32,
    ) -> Result<(), ScriptFailure> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if checks.is_empty() {
            return Ok(());
        }
        let first_failure = AtomicUsize::new(usize::MAX);
        let failure = self.pool.install(|| {
            checks
                .par_iter()
                .enumerate()
                .filter_map(|(position, check)| {
                    if position > first_failure.load(Ordering::Acquire) {
                        return None;
                    }
                    self.checks_run.fetch_add(1, Ordering::Relaxed);
                    match run_check(transactions, check, flags) {
                        Ok(()) => None,
                        Err(error) => {
                            first_failure.fetch_min(position, Ordering::AcqRel);
                            Some((position, error))
                        }
                    }
                })
                .min_by_key(|(position, _)| *position)
        });
        let Some((_, failure)) = failure else {
            return Ok(());
        };
        match transactions.get(failure.tx_index) {
            Some(tx) => ledgerd_log::log_warn!(
                "script validation failed for tx {} input {}: {}",
                hash256_to_hex(&tx.txid()),
                failure.input_index,
                failure.error
            ),
            None => ledgerd_log::log_warn!(
                "script validation failed for input {}: {}",
                failure.input_index,
                failure.error
            ),
        }
        Err(failure)
    }
}

fn run_check(
    transactions: &[Transaction],
    check: &ScriptCheck,
    flags: u32,
) -> Result<(), ScriptFailure> {
    let fail = |error| ScriptFailure {
        tx_index: check.tx_index,
        input_index: check.input_index,
        error,
    };
    let tx = transactions
        .get(check.tx_index)
        .ok_or_else(|| fail(ScriptError::UnknownError))?;
    let input = tx
        .vin
        .get(check.input_index)
        .ok_or_else(|| fail(ScriptError::UnknownError))?;
    verify_script(
        &input.script_sig,
        &check.script_pubkey,
        tx,
        check.input_index,
        check.amount,
        flags,
    )
    .map_err(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerd_primitives::{OutPoint, TxIn, TxOut};
    use ledgerd_script::BLOCK_SCRIPT_VERIFY_FLAGS;

    const OP_TRUE: u8 = 0x51;
    const OP_NOP: u8 = 0x61;

    fn tx_with_inputs(count: usize) -> Transaction {
        Transaction {
            version: 1,
            vin: (0..count)
                .map(|index| TxIn {
                    prevout: OutPoint::new([7u8; 32], index as u32),
                    script_sig: Vec::new(),
                    sequence: u32::MAX,
                })
                .collect(),
            vout: vec![TxOut {
                value: 1,
                script_pubkey: vec![OP_TRUE],
            }],
            lock_time: 0,
        }
    }

    fn check(input_index: usize, script_pubkey: Vec<u8>) -> ScriptCheck {
        ScriptCheck {
            tx_index: 0,
            input_index,
            script_pubkey,
            amount: 1,
        }
    }

    #[test]
    fn passing_checks_all_run() {
        let pool = ScriptPool::new(Some(4)).expect("pool");
        let txs = vec![tx_with_inputs(64)];
        let checks: Vec<_> = (0..64).map(|index| check(index, vec![OP_TRUE])).collect();
        pool.verify(&txs, &checks, BLOCK_SCRIPT_VERIFY_FLAGS)
            .expect("valid");
        assert_eq!(pool.invocations(), 1);
        assert_eq!(pool.checks_run(), 64);
    }

    #[test]
    fn lowest_failure_wins() {
        let pool = ScriptPool::new(Some(4)).expect("pool");
        let txs = vec![tx_with_inputs(64)];
        let mut checks: Vec<_> = (0..64).map(|index| check(index, vec![OP_TRUE])).collect();
        checks[40].script_pubkey = vec![0x00];
        checks[17].script_pubkey = vec![OP_NOP; 202];
        let failure = pool
            .verify(&txs, &checks, BLOCK_SCRIPT_VERIFY_FLAGS)
            .expect_err("invalid");
        assert_eq!(failure.input_index, 17);
        assert_eq!(failure.error, ScriptError::OpCount);
        assert_eq!(
            failure.into_reject(),
            RejectReason::ScriptInvalid {
                reason: ScriptError::OpCount.as_str().into(),
                resource_limit: true,
            }
        );
    }

    #[test]
    fn missing_input_is_reported() {
        let pool = ScriptPool::new(Some(1)).expect("pool");
        let txs = vec![tx_with_inputs(1)];
        let failure = pool
            .verify(&txs, &[check(3, vec![OP_TRUE])], BLOCK_SCRIPT_VERIFY_FLAGS)
            .expect_err("no such input");
        assert_eq!(failure.error, ScriptError::UnknownError);
    }
}
