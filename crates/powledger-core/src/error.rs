//! Error taxonomy for the ledger core.

use thiserror::Error;

/// The persistence collaborator failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// Another writer touched the same keys; the backend may re-run the update.
    #[error("transaction conflict")]
    Conflict,
}

/// A stored record could not be turned back into a value.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record does not start with the block magic")]
    BadMagic,
    #[error("malformed block payload: {0}")]
    Payload(#[from] bincode::Error),
    #[error("hash reference must be {expected} bytes, found {found}")]
    HashLength { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("difficulty_bits must be within 1..=255, got {0}")]
    Difficulty(u32),
    #[error("batch_size must be greater than zero")]
    BatchSize,
    #[error("workers must be greater than zero when set")]
    Workers,
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("decoding error: {0}")]
    Decoding(#[from] DecodeError),
    #[error("failed to encode block: {0}")]
    Encoding(#[source] bincode::Error),
    #[error("block {hash} failed validation: {reason}")]
    Validation { hash: String, reason: &'static str },
    #[error("nonce space [0, {max_nonce}) exhausted without a valid proof")]
    Exhausted { max_nonce: u64 },
    #[error("mining was cancelled")]
    Cancelled,
    #[error("block {0} is referenced but not stored")]
    MissingBlock(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn mining worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl LedgerError {
    /// Store failures are the only ones a retry can fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store(_))
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
