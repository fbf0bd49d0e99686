pub(crate) const DEFAULT_CHAIN_LIMIT: usize = 25;
pub(crate) const MAX_BLOCKS_PER_REQUEST: usize = DEFAULT_CHAIN_LIMIT * 10;
