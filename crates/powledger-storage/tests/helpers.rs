#![allow(dead_code)]

use std::fs;

use powledger_core::LedgerConfig;
use powledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub const NAMESPACE: &str = "blocks";

pub fn test_config() -> LedgerConfig {
    // Low difficulty keeps mining in the millisecond range.
    LedgerConfig {
        difficulty_bits: 8,
        batch_size: 64,
        ..LedgerConfig::default()
    }
}

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (temp_dir, db_path)
}

pub fn create_temp_store() -> (TempDir, SledStore) {
    let (temp_dir, db_path) = create_temp_dir();
    (
        temp_dir,
        SledStore::open(&db_path, NAMESPACE).expect("Failed to open SledStore"),
    )
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    // Verify the directory is removed
    assert!(!db_path.exists(), "Database directory should be removed");
}
