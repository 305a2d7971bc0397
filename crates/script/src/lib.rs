//! Script evaluation for transparent inputs.

pub mod instruction;
pub mod interpreter;
pub mod num;
pub mod opcodes;
pub mod sighash;
pub mod sigops;

pub use interpreter::{
    eval_script, verify_script, ScriptError, SignatureChecker, BLOCK_SCRIPT_VERIFY_FLAGS,
    STANDARD_SCRIPT_VERIFY_FLAGS,
};
pub use sighash::{signature_hash, SighashError, SighashType};
pub use sigops::legacy_sigop_count;
