pub const BYTE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const HASH_BITS: u32 = (HASH_SIZE * BYTE) as u32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const NONCES_PER_BATCH: u64 = 1000;
pub const MAX_NONCE: u64 = i64::MAX as u64;
pub const POW_TARGET_DIFFICULTY: u32 = 24;
pub const DEFAULT_NAMESPACE: &str = "blocks";
pub const TIP_KEY: &str = "l";
pub const GENESIS_DATA: &str = "Genesis block";
pub const CODEC_MAGIC: [u8; 4] = *b"PWB1";
pub const MAX_RECORD_BYTES: u64 = 64 * 1024 * 1024;
