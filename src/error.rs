// Error taxonomy for the relayer core

use thiserror::Error;

/// Errors surfaced synchronously at ingestion; no state is mutated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid order hash: {0}")]
    InvalidOrderHash(String),

    #[error("unsupported order kind: {marketplace}:{kind}")]
    UnsupportedOrderKind { marketplace: String, kind: String },

    #[error("order start time {start} is after end time {end}")]
    InvalidTimeWindow { start: i64, end: i64 },

    #[error("start price must be non-negative, got {0}")]
    NegativePrice(f64),

    #[error("collection-wide listings are not supported")]
    CollectionWideListing,

    #[error("order chain id {order} does not match relayer chain id {relayer}")]
    ChainMismatch { order: u64, relayer: u64 },
}

/// Storage-layer failures. Per-entry commit errors in a batch are logged
/// and skipped; the batch continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("transaction commit failed for {key}: {reason}")]
    TransactionCommit { key: String, reason: String },

    #[error("corrupt payload under {key}: {reason}")]
    CorruptPayload { key: String, reason: String },
}

/// Nonce provider failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NonceError {
    #[error("lock expired")]
    LeaseExpired,

    #[error("nonce provider is closed")]
    Closed,

    #[error("lease is held by another replica")]
    Contended,

    #[error("nonce provider is not running")]
    NotRunning,
}

/// Chain RPC failures. Transient variants are retried with backoff by the
/// client; persistent failures surface upward.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed rpc response: {0}")]
    MalformedResponse(String),
}

impl ChainError {
    /// Transport failures and server-side overload codes are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Transport(_) => true,
            ChainError::Rpc { code, .. } => matches!(*code, -32000 | -32005 | 429),
            ChainError::MalformedResponse(_) => false,
        }
    }
}

/// Execution engine failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("execution rejected: {0}")]
    Rejected(String),

    #[error("no builder enabled for {marketplace}:{kind}")]
    NoBuilder { marketplace: String, kind: String },

    #[error("order nonce {nonce} is at or below the cancellation watermark {watermark}")]
    BelowWatermark { nonce: u64, watermark: u64 },

    #[error("signing failed: {0}")]
    Signing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_kind_display() {
        let err = ValidationError::UnsupportedOrderKind {
            marketplace: "rarible".to_string(),
            kind: "bundle-ask".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported order kind: rarible:bundle-ask");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChainError::Transport("timeout".to_string()).is_transient());
        assert!(ChainError::Rpc { code: -32000, message: "busy".to_string() }.is_transient());
        assert!(!ChainError::Rpc { code: 3, message: "revert".to_string() }.is_transient());
    }
}
