//! Reject reasons and engine errors.

use std::borrow::Cow;

use ledgerd_primitives::encoding::{DecodeError, Decoder, Encoder};
use ledgerd_storage::StoreError;

pub type Reason = Cow<'static, str>;

pub const MERKLE_MISMATCH: &str = "bad-txnmrklroot";
pub const MERKLE_MUTATED: &str = "bad-txns-duplicate-mutated";
pub const TIME_TOO_NEW: &str = "time-too-new";
pub const BAD_PREVBLK: &str = "bad-prevblk";

/// Why a block or transaction was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    MalformedEncoding(Reason),
    StructuralInvalid(Reason),
    ProofOfWorkInvalid(Reason),
    CheckpointMismatch { height: i32 },
    ScriptInvalid { reason: Reason, resource_limit: bool },
    UtxoInconsistent(Reason),
}

impl RejectReason {
    pub fn structural(reason: &'static str) -> Self {
        RejectReason::StructuralInvalid(Cow::Borrowed(reason))
    }

    pub fn utxo(reason: &'static str) -> Self {
        RejectReason::UtxoInconsistent(Cow::Borrowed(reason))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::MalformedEncoding(_) => "malformed-encoding",
            RejectReason::StructuralInvalid(_) => "structural-invalid",
            RejectReason::ProofOfWorkInvalid(_) => "proof-of-work-invalid",
            RejectReason::CheckpointMismatch { .. } => "checkpoint-mismatch",
            RejectReason::ScriptInvalid { .. } => "script-invalid",
            RejectReason::UtxoInconsistent(_) => "utxo-inconsistent",
        }
    }

    /// Whether the verdict may be cached against the block hash.
    ///
    /// Encoding errors and merkle failures can come from a corrupted copy of
    /// an otherwise valid block, and a block from the future may become
    /// acceptable later.
    pub fn is_permanent(&self) -> bool {
        match self {
            RejectReason::MalformedEncoding(_) => false,
            RejectReason::StructuralInvalid(reason) => {
                reason != MERKLE_MISMATCH && reason != MERKLE_MUTATED && reason != TIME_TOO_NEW
            }
            _ => true,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        match self {
            RejectReason::MalformedEncoding(reason) => {
                encoder.write_u8(0);
                encoder.write_var_bytes(reason.as_bytes());
            }
            RejectReason::StructuralInvalid(reason) => {
                encoder.write_u8(1);
                encoder.write_var_bytes(reason.as_bytes());
            }
            RejectReason::ProofOfWorkInvalid(reason) => {
                encoder.write_u8(2);
                encoder.write_var_bytes(reason.as_bytes());
            }
            RejectReason::CheckpointMismatch { height } => {
                encoder.write_u8(3);
                encoder.write_i32_le(*height);
            }
            RejectReason::ScriptInvalid {
                reason,
                resource_limit,
            } => {
                encoder.write_u8(4);
                encoder.write_var_bytes(reason.as_bytes());
                encoder.write_u8(u8::from(*resource_limit));
            }
            RejectReason::UtxoInconsistent(reason) => {
                encoder.write_u8(5);
                encoder.write_var_bytes(reason.as_bytes());
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tag = decoder.read_u8()?;
        let reason = match tag {
            0 => RejectReason::MalformedEncoding(read_reason(&mut decoder)?),
            1 => RejectReason::StructuralInvalid(read_reason(&mut decoder)?),
            2 => RejectReason::ProofOfWorkInvalid(read_reason(&mut decoder)?),
            3 => RejectReason::CheckpointMismatch {
                height: decoder.read_i32_le()?,
            },
            4 => {
                let reason = read_reason(&mut decoder)?;
                let resource_limit = decoder.read_u8()? != 0;
                RejectReason::ScriptInvalid {
                    reason,
                    resource_limit,
                }
            }
            5 => RejectReason::UtxoInconsistent(read_reason(&mut decoder)?),
            _ => return Err(DecodeError::InvalidData("unknown reject reason tag")),
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(reason)
    }
}

fn read_reason(decoder: &mut Decoder) -> Result<Reason, DecodeError> {
    let bytes = decoder.read_var_bytes()?;
    String::from_utf8(bytes)
        .map(Cow::Owned)
        .map_err(|_| DecodeError::InvalidData("reject reason is not utf-8"))
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MalformedEncoding(reason)
            | RejectReason::StructuralInvalid(reason)
            | RejectReason::ProofOfWorkInvalid(reason)
            | RejectReason::UtxoInconsistent(reason) => write!(f, "{}: {reason}", self.kind()),
            RejectReason::CheckpointMismatch { height } => {
                write!(f, "{}: height {height}", self.kind())
            }
            RejectReason::ScriptInvalid {
                reason,
                resource_limit,
            } => {
                if *resource_limit {
                    write!(f, "{}: {reason} (resource limit)", self.kind())
                } else {
                    write!(f, "{}: {reason}", self.kind())
                }
            }
        }
    }
}

impl std::error::Error for RejectReason {}

/// Internal failure of a chainstate step: either a consensus verdict or a
/// storage problem that must stop the engine.
#[derive(Debug)]
pub enum ChainStateError {
    Reject(RejectReason),
    Store(StoreError),
    CorruptIndex(&'static str),
}

impl std::fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStateError::Reject(reason) => write!(f, "{reason}"),
            ChainStateError::Store(err) => write!(f, "{err}"),
            ChainStateError::CorruptIndex(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<RejectReason> for ChainStateError {
    fn from(reason: RejectReason) -> Self {
        ChainStateError::Reject(reason)
    }
}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

/// Errors surfaced by [`crate::engine::Engine`]. None of them is a verdict
/// about the submitted data, so none is ever cached.
#[derive(Debug)]
pub enum EngineError {
    /// The ledger store failed; the engine refuses further mutations.
    LedgerIo(StoreError),
    CorruptIndex(&'static str),
    /// An earlier fatal error latched the engine.
    Halted,
    Poisoned,
    ThreadPool(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::LedgerIo(err) => write!(f, "ledger i/o failure: {err}"),
            EngineError::CorruptIndex(message) => write!(f, "corrupt index: {message}"),
            EngineError::Halted => write!(f, "engine halted after a fatal ledger error"),
            EngineError::Poisoned => write!(f, "engine lock poisoned"),
            EngineError::ThreadPool(message) => write!(f, "script thread pool: {message}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::LedgerIo(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_survive_storage_encoding() {
        let reasons = [
            RejectReason::structural("bad-cb-missing"),
            RejectReason::ProofOfWorkInvalid(Cow::Borrowed("high-hash")),
            RejectReason::CheckpointMismatch { height: 42 },
            RejectReason::ScriptInvalid {
                reason: Cow::Borrowed("op-count"),
                resource_limit: true,
            },
            RejectReason::utxo("bad-txns-inputs-missingorspent"),
        ];
        for reason in reasons {
            let decoded = RejectReason::decode(&reason.encode()).expect("decode");
            assert_eq!(decoded, reason);
        }
    }

    #[test]
    fn corruption_verdicts_are_not_permanent() {
        assert!(!RejectReason::structural(MERKLE_MISMATCH).is_permanent());
        assert!(!RejectReason::structural(MERKLE_MUTATED).is_permanent());
        assert!(!RejectReason::structural(TIME_TOO_NEW).is_permanent());
        assert!(!RejectReason::MalformedEncoding(Cow::Borrowed("eof")).is_permanent());
        assert!(RejectReason::structural("bad-cb-amount").is_permanent());
        assert!(RejectReason::CheckpointMismatch { height: 1 }.is_permanent());
    }
}
