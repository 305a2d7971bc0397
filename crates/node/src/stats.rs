use std::time::Instant;

use ledgerd_chainstate::Engine;
use ledgerd_consensus::params::{hash256_to_hex, Network};
use ledgerd_storage::KeyValueStore;
use serde::Serialize;

use crate::config::Backend;

#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub network: String,
    pub backend: String,
    pub uptime_secs: u64,
    pub halted: bool,
    pub best_block_height: Option<i32>,
    pub best_block_hash: Option<String>,
    pub chainwork: Option<String>,
    pub verification_progress: f64,
    pub blocks_submitted: u64,
    pub blocks_validated: u64,
    pub blocks_rejected: u64,
    pub verdict_cache_hits: u64,
    pub connect_blocks: u64,
    pub connect_us: u64,
    pub disconnect_blocks: u64,
    pub disconnect_us: u64,
    pub script_checks: u64,
    pub reorgs: u64,
}

pub fn snapshot_status<S: KeyValueStore>(
    engine: &Engine<S>,
    network: Network,
    backend: Backend,
    start_time: Instant,
) -> StatusSnapshot {
    let tip = engine.get_best_tip();
    let metrics = engine.metrics();
    StatusSnapshot {
        network: network.as_str().to_string(),
        backend: backend.as_str().to_string(),
        uptime_secs: start_time.elapsed().as_secs(),
        halted: engine.is_halted(),
        best_block_height: tip.as_ref().map(|tip| tip.height),
        best_block_hash: tip.as_ref().map(|tip| hash256_to_hex(&tip.hash)),
        chainwork: tip.as_ref().map(|tip| format!("{:x}", tip.chainwork)),
        verification_progress: engine.verification_progress().unwrap_or(0.0),
        blocks_submitted: metrics.blocks_submitted,
        blocks_validated: metrics.blocks_validated,
        blocks_rejected: metrics.blocks_rejected,
        verdict_cache_hits: metrics.verdict_cache_hits,
        connect_blocks: metrics.connect_blocks,
        connect_us: metrics.connect_us,
        disconnect_blocks: metrics.disconnect_blocks,
        disconnect_us: metrics.disconnect_us,
        script_checks: metrics.script_checks,
        reorgs: metrics.reorgs,
    }
}

impl StatusSnapshot {
    pub fn status_line(&self) -> String {
        let avg_connect_ms = if self.connect_blocks == 0 {
            0.0
        } else {
            self.connect_us as f64 / self.connect_blocks as f64 / 1000.0
        };
        format!(
            "height {} progress {:.4} submitted {} rejected {} cache_hits {} reorgs {} avg_connect {:.2}ms{}",
            self.best_block_height
                .map(|height| height.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.verification_progress,
            self.blocks_submitted,
            self.blocks_rejected,
            self.verdict_cache_hits,
            self.reorgs,
            avg_connect_ms,
            if self.halted { " HALTED" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ledgerd_chainstate::engine::EngineOptions;
    use ledgerd_consensus::params::chain_params;
    use ledgerd_storage::memory::MemoryStore;

    use super::*;

    #[test]
    fn empty_engine_snapshot_serializes() {
        let engine = Engine::open(
            Arc::new(MemoryStore::new()),
            chain_params(Network::Regtest).consensus,
            EngineOptions {
                script_threads: Some(1),
                ..EngineOptions::default()
            },
        )
        .expect("engine");
        let snapshot = snapshot_status(&engine, Network::Regtest, Backend::Memory, Instant::now());
        assert_eq!(snapshot.best_block_height, None);
        assert!(!snapshot.halted);
        assert!(snapshot.status_line().starts_with("height - "));

        let json = serde_json::to_value(&snapshot).expect("json");
        assert_eq!(json["network"], "regtest");
        assert_eq!(json["backend"], "memory");
        assert!(json["best_block_hash"].is_null());
    }
}
