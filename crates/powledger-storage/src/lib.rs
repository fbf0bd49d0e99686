//! Persistent backends for the ledger's `PersistentStore` contract.

pub mod sled_store;

pub use sled_store::SledStore;
