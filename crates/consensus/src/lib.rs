//! Consensus constants, network parameters, checkpoints, and subsidy schedule.

pub mod checkpoints;
pub mod constants;
pub mod money;
pub mod params;
pub mod subsidy;

pub type Hash256 = [u8; 32];

pub use checkpoints::{CheckpointData, CheckpointTable};
pub use params::{chain_params, consensus_params, ChainParams, Checkpoint, ConsensusParams, Network};
pub use subsidy::block_subsidy;
