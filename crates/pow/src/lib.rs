//! Compact targets, chain work, difficulty retargeting and header proof-of-work.

pub mod compact;
pub mod difficulty;
pub mod validation;

pub use compact::{block_proof, compact_to_target, hash_meets_target, target_to_compact};
pub use difficulty::{next_work_required, retarget_window, HeaderInfo};
pub use validation::{validate_pow_header, PowError};
