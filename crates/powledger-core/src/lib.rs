//! Append-only ledger whose blocks are admitted by proof of work.

pub mod block;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod ledger;
mod mine;
pub mod pow;
pub mod store;

pub use block::{finalize, Block, BlockTemplate, Hash};
pub use config::LedgerConfig;
pub use error::{ConfigError, DecodeError, LedgerError, StoreError};
pub use ledger::{Ledger, LedgerIterator};
pub use pow::{Proof, ProofOfWork};
pub use store::{MemoryStore, PersistentStore, RetryPolicy, RetryingStore, StoreTxn};
