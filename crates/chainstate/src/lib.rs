//! Block validation, chain selection and the UTXO ledger.

pub mod blockindex;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod scriptpool;
pub mod undo;
pub mod validation;

pub use blockindex::{BlockIndex, BlockNode, BlockStatus};
pub use engine::{ChainTip, Engine, EngineOptions, SubmitOutcome, TipChanged};
pub use error::{ChainStateError, EngineError, RejectReason};
pub use ledger::{Ledger, UtxoEntry};
