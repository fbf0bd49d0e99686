use crate::constants::HASH_SIZE;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub type Hash = [u8; HASH_SIZE];

/// A block whose contents are fixed but whose proof has not been found yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTemplate {
    pub timestamp: i64,
    pub data: Vec<u8>,
    pub prev_hash: Vec<u8>,
}

/// One mined, hash-linked unit of the ledger. Never mutated after sealing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    pub data: Vec<u8>,
    pub prev_hash: Vec<u8>,
    pub hash: Hash,
    pub nonce: u64,
}

/// Builds the unmined block for `data` on top of `prev_hash`.
pub fn finalize(
    data: impl Into<Vec<u8>>,
    prev_hash: impl Into<Vec<u8>>,
    timestamp: i64,
) -> BlockTemplate {
    BlockTemplate {
        timestamp,
        data: data.into(),
        prev_hash: prev_hash.into(),
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Everything in the digest input except the trailing nonce:
/// `prev_hash ++ data ++ be64(timestamp) ++ be64(difficulty_bits)`.
pub fn digest_prefix(
    prev_hash: &[u8],
    data: &[u8],
    timestamp: i64,
    difficulty_bits: u32,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(prev_hash.len() + data.len() + 8 + 8 + 8);
    bytes.extend_from_slice(prev_hash);
    bytes.extend_from_slice(data);
    bytes.extend_from_slice(&timestamp.to_be_bytes());
    bytes.extend_from_slice(&i64::from(difficulty_bits).to_be_bytes());
    bytes
}

pub fn digest(prefix: &[u8], nonce: u64) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(prefix);
    hasher.update(nonce.to_be_bytes());
    hasher.finalize().into()
}

impl BlockTemplate {
    pub fn digest_prefix(&self, difficulty_bits: u32) -> Vec<u8> {
        digest_prefix(&self.prev_hash, &self.data, self.timestamp, difficulty_bits)
    }

    pub fn seal(self, nonce: u64, hash: Hash) -> Block {
        Block {
            timestamp: self.timestamp,
            data: self.data,
            prev_hash: self.prev_hash,
            hash,
            nonce,
        }
    }
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Recomputes the digest from the stored fields and nonce.
    pub fn compute_hash(&self, difficulty_bits: u32) -> Hash {
        let prefix = digest_prefix(
            &self.prev_hash,
            &self.data,
            self.timestamp,
            difficulty_bits,
        );
        digest(&prefix, self.nonce)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}
