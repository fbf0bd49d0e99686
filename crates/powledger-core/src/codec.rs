//! Binary record format for persisted blocks.
//!
//! A record is the 4-byte magic followed by the bincode encoding of [`Block`].
//! Variable-length fields carry bincode's u64 length prefix, so a record decodes
//! without outside context.

use crate::block::{Block, Hash};
use crate::constants::{CODEC_MAGIC, HASH_SIZE, MAX_RECORD_BYTES};
use crate::error::DecodeError;
use bincode::Options;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .with_limit(MAX_RECORD_BYTES)
        .reject_trailing_bytes()
}

/// Fails only when the record would exceed [`MAX_RECORD_BYTES`].
pub fn encode(block: &Block) -> Result<Vec<u8>, bincode::Error> {
    let mut out = Vec::with_capacity(
        CODEC_MAGIC.len() + 8 * 4 + block.data.len() + block.prev_hash.len() + HASH_SIZE,
    );
    out.extend_from_slice(&CODEC_MAGIC);
    options().serialize_into(&mut out, block)?;
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Block, DecodeError> {
    let payload = bytes
        .strip_prefix(CODEC_MAGIC.as_slice())
        .ok_or(DecodeError::BadMagic)?;
    Ok(options().deserialize(payload)?)
}

/// Reads a stored tip pointer or previous-hash link.
pub fn decode_hash(bytes: &[u8]) -> Result<Hash, DecodeError> {
    Hash::try_from(bytes).map_err(|_| DecodeError::HashLength {
        expected: HASH_SIZE,
        found: bytes.len(),
    })
}
