//! Per-ledger configuration. Every ledger and proof-of-work engine is built from
//! one of these, so several independently tuned ledgers can live in a process.

use crate::constants::{
    DEFAULT_NAMESPACE, GENESIS_DATA, HASH_BITS, MAX_NONCE, NONCES_PER_BATCH,
    POW_TARGET_DIFFICULTY, TIP_KEY,
};
use crate::error::ConfigError;
use serde::Deserialize;
use std::{fs, num::NonZeroUsize, path::Path, thread};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Required leading zero bits; the target is `2^(256 - difficulty_bits)`.
    pub difficulty_bits: u32,
    /// Nonces handed to a worker at a time.
    pub batch_size: u64,
    /// Exclusive upper bound of the nonce search.
    pub max_nonce: u64,
    /// Mining threads. `None` uses the available hardware parallelism.
    pub workers: Option<usize>,
    /// Storage namespace (sled tree) holding blocks and the tip pointer.
    pub namespace: String,
    pub tip_key: String,
    pub genesis_data: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty_bits: POW_TARGET_DIFFICULTY,
            batch_size: NONCES_PER_BATCH,
            max_nonce: MAX_NONCE,
            workers: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            tip_key: TIP_KEY.to_string(),
            genesis_data: GENESIS_DATA.to_string(),
        }
    }
}

impl LedgerConfig {
    /// Default configuration at the given difficulty.
    pub fn with_difficulty(difficulty_bits: u32) -> Self {
        Self {
            difficulty_bits,
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty_bits == 0 || self.difficulty_bits >= HASH_BITS {
            return Err(ConfigError::Difficulty(self.difficulty_bits));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::BatchSize);
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Workers);
        }
        if self.namespace.is_empty() {
            return Err(ConfigError::Empty("namespace"));
        }
        if self.tip_key.is_empty() {
            return Err(ConfigError::Empty("tip_key"));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}
