//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    blocks_submitted: AtomicU64,
    blocks_validated: AtomicU64,
    blocks_rejected: AtomicU64,
    verdict_cache_hits: AtomicU64,
    connect_us: AtomicU64,
    connect_blocks: AtomicU64,
    disconnect_us: AtomicU64,
    disconnect_blocks: AtomicU64,
    script_checks: AtomicU64,
    reorgs: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    pub blocks_submitted: u64,
    /// Blocks that made it past decoding and the verdict cache.
    pub blocks_validated: u64,
    pub blocks_rejected: u64,
    pub verdict_cache_hits: u64,
    pub connect_us: u64,
    pub connect_blocks: u64,
    pub disconnect_us: u64,
    pub disconnect_blocks: u64,
    pub script_checks: u64,
    pub reorgs: u64,
}

impl EngineMetrics {
    pub fn record_submitted(&self) {
        self.blocks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validated(&self) {
        self.blocks_validated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.verdict_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self, elapsed: Duration, script_checks: usize) {
        self.connect_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.connect_blocks.fetch_add(1, Ordering::Relaxed);
        self.script_checks
            .fetch_add(script_checks as u64, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self, elapsed: Duration) {
        self.disconnect_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.disconnect_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reorg(&self) {
        self.reorgs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            blocks_submitted: self.blocks_submitted.load(Ordering::Relaxed),
            blocks_validated: self.blocks_validated.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            verdict_cache_hits: self.verdict_cache_hits.load(Ordering::Relaxed),
            connect_us: self.connect_us.load(Ordering::Relaxed),
            connect_blocks: self.connect_blocks.load(Ordering::Relaxed),
            disconnect_us: self.disconnect_us.load(Ordering::Relaxed),
            disconnect_blocks: self.disconnect_blocks.load(Ordering::Relaxed),
            script_checks: self.script_checks.load(Ordering::Relaxed),
            reorgs: self.reorgs.load(Ordering::Relaxed),
        }
    }
}
