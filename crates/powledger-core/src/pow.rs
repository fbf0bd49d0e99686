use crate::block::{Block, BlockTemplate, Hash};
use crate::config::LedgerConfig;
use crate::constants::{HASH_BITS, HASH_SIZE};
use crate::error::Result;
use num_bigint::BigUint;
use std::sync::atomic::AtomicBool;

/// Winning nonce and the hash it produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Proof {
    pub nonce: u64,
    pub hash: Hash,
}

/// Difficulty-gated admission rule plus the parallel nonce search.
///
/// The target is fixed at construction and only ever read, so one engine can
/// be shared by every worker thread.
#[derive(Clone, Debug)]
pub struct ProofOfWork {
    difficulty_bits: u32,
    target: BigUint,
    target_be: Hash,
    pub(crate) batch_size: u64,
    pub(crate) max_nonce: u64,
    pub(crate) workers: usize,
}

impl ProofOfWork {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;
        let target = BigUint::from(1u8) << (HASH_BITS - config.difficulty_bits);
        Ok(Self {
            difficulty_bits: config.difficulty_bits,
            target_be: to_fixed_be(&target),
            target,
            batch_size: config.batch_size,
            max_nonce: config.max_nonce,
            workers: config.worker_count(),
        })
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    pub fn target(&self) -> &BigUint {
        &self.target
    }

    /// True iff the block's stored nonce yields a hash below the target.
    pub fn validate(&self, block: &Block) -> bool {
        let hash = block.compute_hash(self.difficulty_bits);
        BigUint::from_bytes_be(&hash) < self.target
    }

    /// Byte-wise form of the target comparison: for equal-length big-endian
    /// values lexicographic order is numeric order.
    #[inline]
    pub fn meets_target(&self, hash: &Hash) -> bool {
        *hash < self.target_be
    }

    /// Searches `[0, max_nonce)` until some nonce satisfies the target.
    pub fn mine(&self, template: &BlockTemplate) -> Result<Proof> {
        self.mine_with_cancel(template, &AtomicBool::new(false))
    }

    /// Like [`ProofOfWork::mine`], giving up with `Cancelled` once `cancel` is set.
    pub fn mine_with_cancel(
        &self,
        template: &BlockTemplate,
        cancel: &AtomicBool,
    ) -> Result<Proof> {
        crate::mine::search(self, &template.digest_prefix(self.difficulty_bits), cancel)
    }
}

// Only called with targets below 2^256, which fit in HASH_SIZE bytes.
fn to_fixed_be(value: &BigUint) -> Hash {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; HASH_SIZE];
    out[HASH_SIZE - bytes.len()..].copy_from_slice(&bytes);
    out
}
