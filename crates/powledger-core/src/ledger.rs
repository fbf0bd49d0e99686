use crate::block::{self, Block, Hash};
use crate::codec;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::pow::ProofOfWork;
use crate::store::{PersistentStore, StoreTxn};
use rayon::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use tracing::{debug, info};

/// Single-branch, append-only chain of mined blocks.
///
/// The only mutable state is the tip pointer, stored under `config.tip_key`;
/// blocks are stored under their own hash.
pub struct Ledger<S: PersistentStore> {
    store: S,
    pow: ProofOfWork,
    config: LedgerConfig,
    // Serializes read-tip/mine/write so two callers never extend the same tip.
    append: Mutex<()>,
}

impl<S: PersistentStore> Ledger<S> {
    /// Opens the ledger, mining and storing the genesis block if the store has
    /// no tip yet.
    pub fn open(store: S, config: LedgerConfig) -> Result<Self> {
        let pow = ProofOfWork::new(&config)?;
        let ledger = Self {
            store,
            pow,
            config,
            append: Mutex::new(()),
        };
        let tip = ledger.store.atomic_update(|txn| {
            if let Some(raw) = txn.get(ledger.tip_key())? {
                return Ok(codec::decode_hash(&raw)?);
            }
            info!(
                difficulty = ledger.pow.difficulty_bits(),
                "no chain found, mining genesis block"
            );
            let genesis = ledger.mine_onto(
                txn,
                ledger.config.genesis_data.as_bytes(),
                Vec::new(),
                &AtomicBool::new(false),
            )?;
            Ok(genesis.hash)
        })?;
        info!(
            tip = %hex::encode(tip),
            namespace = %ledger.config.namespace,
            "ledger opened"
        );
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn tip_key(&self) -> &[u8] {
        self.config.tip_key.as_bytes()
    }

    /// Hash of the most recently appended block.
    pub fn tip(&self) -> Result<Hash> {
        let raw = self
            .store
            .read(self.tip_key())?
            .ok_or_else(|| LedgerError::MissingBlock("tip".to_string()))?;
        Ok(codec::decode_hash(&raw)?)
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.store.read(hash)? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Mines a block carrying `data` on top of the current tip and makes it the
    /// new tip. Blocks until a proof is found.
    pub fn add_block(&self, data: impl AsRef<[u8]>) -> Result<Block> {
        self.add_block_with_cancel(data, &AtomicBool::new(false))
    }

    /// Like [`Ledger::add_block`]; setting `cancel` stops the mining workers
    /// and leaves the ledger unchanged.
    pub fn add_block_with_cancel(
        &self,
        data: impl AsRef<[u8]>,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        let data = data.as_ref();
        let _guard = self
            .append
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let block = self.store.atomic_update(|txn| {
            let raw = txn
                .get(self.tip_key())?
                .ok_or_else(|| LedgerError::MissingBlock("tip".to_string()))?;
            let tip = codec::decode_hash(&raw)?;
            self.mine_onto(txn, data, tip.to_vec(), cancel)
        })?;
        info!(hash = %block.hash_hex(), nonce = block.nonce, "block appended");
        Ok(block)
    }

    fn mine_onto(
        &self,
        txn: &dyn StoreTxn,
        data: &[u8],
        prev_hash: Vec<u8>,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        let template = block::finalize(data, prev_hash, block::now_secs());
        let proof = self.pow.mine_with_cancel(&template, cancel)?;
        let block = template.seal(proof.nonce, proof.hash);
        let encoded = codec::encode(&block).map_err(LedgerError::Encoding)?;
        txn.put(&block.hash, &encoded)?;
        txn.put(self.tip_key(), &block.hash)?;
        Ok(block)
    }

    /// Fresh newest-to-genesis traversal starting at the current tip.
    pub fn iterator(&self) -> Result<LedgerIterator<'_, S>> {
        Ok(LedgerIterator {
            ledger: self,
            current: Some(self.tip()?),
        })
    }

    /// Walks the whole chain and checks every proof of work. Returns the number
    /// of blocks.
    pub fn verify(&self) -> Result<usize> {
        let blocks = self.iterator()?.collect::<Result<Vec<_>>>()?;
        if let Some(bad) = blocks.par_iter().find_any(|b| !self.pow.validate(b)) {
            return Err(LedgerError::Validation {
                hash: bad.hash_hex(),
                reason: "hash does not meet the difficulty target",
            });
        }
        debug!(blocks = blocks.len(), "chain verified");
        Ok(blocks.len())
    }
}

/// Lazy, single-pass walk from the tip back to genesis.
///
/// Each stored block must sit under the key equal to its recomputed digest;
/// anything else is reported as a validation failure. The iterator is fused
/// after the genesis block or the first error.
pub struct LedgerIterator<'a, S: PersistentStore> {
    ledger: &'a Ledger<S>,
    current: Option<Hash>,
}

impl<S: PersistentStore> LedgerIterator<'_, S> {
    fn load(&self, hash: &Hash) -> Result<Block> {
        let block = self
            .ledger
            .get_block(hash)?
            .ok_or_else(|| LedgerError::MissingBlock(hex::encode(hash)))?;
        let recomputed = block.compute_hash(self.ledger.pow.difficulty_bits());
        if block.hash != *hash || recomputed != block.hash {
            return Err(LedgerError::Validation {
                hash: hex::encode(hash),
                reason: "stored fields do not reproduce the block hash",
            });
        }
        Ok(block)
    }
}

impl<S: PersistentStore> Iterator for LedgerIterator<'_, S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        match self.load(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    match codec::decode_hash(&block.prev_hash) {
                        Ok(prev) => self.current = Some(prev),
                        Err(e) => return Some(Err(e.into())),
                    }
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S: PersistentStore> std::iter::FusedIterator for LedgerIterator<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::Ordering;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn config() -> LedgerConfig {
        LedgerConfig {
            difficulty_bits: 8,
            batch_size: 64,
            ..LedgerConfig::default()
        }
    }

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::open(MemoryStore::new(), config()).unwrap()
    }

    fn chain(ledger: &Ledger<MemoryStore>) -> Vec<Block> {
        ledger.iterator().unwrap().collect::<Result<_>>().unwrap()
    }

    #[test]
    fn open_mines_a_valid_genesis() {
        let ledger = ledger();
        let blocks = chain(&ledger);
        assert_eq!(blocks.len(), 1);
        let genesis = &blocks[0];
        assert!(genesis.is_genesis());
        assert_eq!(genesis.data, b"Genesis block");
        assert!(ledger.pow().validate(genesis));
        assert_eq!(ledger.tip().unwrap(), genesis.hash);
    }

    #[test]
    fn reopening_keeps_the_existing_tip() {
        let store = Arc::new(MemoryStore::new());
        let first = Ledger::open(store.clone(), config()).unwrap();
        let added = first.add_block("kept").unwrap();
        drop(first);

        let second = Ledger::open(store.clone(), config()).unwrap();
        assert_eq!(second.tip().unwrap(), added.hash);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn send_btc_scenario() {
        let ledger = ledger();
        ledger.add_block("Send 1 BTC to somebody").unwrap();
        ledger.add_block("Send 100 BTC to someone").unwrap();

        let blocks = chain(&ledger);
        let data: Vec<&[u8]> = blocks.iter().map(|b| b.data.as_slice()).collect();
        assert_eq!(
            data,
            vec![
                &b"Send 100 BTC to someone"[..],
                &b"Send 1 BTC to somebody"[..],
                &b"Genesis block"[..],
            ]
        );
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, pair[1].hash.to_vec());
        }
        assert!(blocks.last().unwrap().is_genesis());
    }

    #[test]
    fn n_additions_yield_n_plus_one_valid_blocks() {
        let ledger = ledger();
        for i in 0..5 {
            let block = ledger.add_block(format!("block {i}")).unwrap();
            assert_eq!(ledger.tip().unwrap(), block.hash);
        }
        let blocks = chain(&ledger);
        assert_eq!(blocks.len(), 6);
        for block in &blocks {
            assert_eq!(block.compute_hash(8), block.hash);
            assert!(ledger.pow().validate(block));
        }
        assert_eq!(ledger.verify().unwrap(), 6);
    }

    #[test]
    fn empty_data_is_allowed() {
        let ledger = ledger();
        let block = ledger.add_block("").unwrap();
        assert!(block.data.is_empty());
        assert_eq!(ledger.get_block(&block.hash).unwrap(), Some(block));
    }

    #[test]
    fn iterators_are_independent_and_single_pass() {
        let ledger = ledger();
        ledger.add_block("one").unwrap();
        let mut it = ledger.iterator().unwrap();
        assert!(it.next().unwrap().is_ok());
        assert!(it.next().unwrap().unwrap().is_genesis());
        assert!(it.next().is_none());
        assert!(it.next().is_none());
        assert_eq!(ledger.iterator().unwrap().count(), 2);
    }

    #[test]
    fn concurrent_appends_never_fork() {
        let ledger = Arc::new(ledger());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.add_block(format!("writer {i}")).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let blocks = chain(&ledger);
        assert_eq!(blocks.len(), 5);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, pair[1].hash.to_vec());
        }
    }

    #[test]
    fn cancelled_append_leaves_ledger_unchanged() {
        let ledger = ledger();
        let tip = ledger.tip().unwrap();
        let cancel = AtomicBool::new(true);
        let err = ledger.add_block_with_cancel("never", &cancel).unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
        assert!(cancel.load(Ordering::Relaxed));
        assert_eq!(ledger.tip().unwrap(), tip);
        assert_eq!(ledger.store().len(), 2);
    }

    #[test]
    fn tip_stays_readable_while_a_block_is_mining() {
        let store = Arc::new(MemoryStore::new());
        let tip = Ledger::open(store.clone(), config()).unwrap().tip().unwrap();
        let hard = Arc::new(
            Ledger::open(
                store.clone(),
                LedgerConfig {
                    difficulty_bits: 200,
                    workers: Some(1),
                    ..config()
                },
            )
            .unwrap(),
        );
        let cancel = Arc::new(AtomicBool::new(false));
        let miner = {
            let hard = Arc::clone(&hard);
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || hard.add_block_with_cancel("never mined", &cancel))
        };
        thread::sleep(Duration::from_millis(100));

        let (tx, rx) = mpsc::channel();
        {
            let ledger = Arc::clone(&hard);
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let raw = store.read(b"l").unwrap();
                let tip = ledger.tip().unwrap();
                let blocks = ledger.iterator().unwrap().count();
                let _ = tx.send((raw, tip, blocks));
            });
        }
        let read = rx.recv_timeout(Duration::from_secs(2));
        cancel.store(true, Ordering::Relaxed);
        assert!(matches!(miner.join().unwrap(), Err(LedgerError::Cancelled)));

        let (raw, seen, blocks) = read.expect("reads blocked while a block was mining");
        assert_eq!(raw, Some(tip.to_vec()));
        assert_eq!(seen, tip);
        assert_eq!(blocks, 1);
    }

    #[test]
    fn exhausted_append_leaves_ledger_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let tip = Ledger::open(store.clone(), config()).unwrap().tip().unwrap();
        let strict = Ledger::open(
            store.clone(),
            LedgerConfig {
                max_nonce: 10,
                difficulty_bits: 200,
                ..config()
            },
        )
        .unwrap();
        let err = strict.add_block("too hard").unwrap_err();
        assert!(matches!(err, LedgerError::Exhausted { max_nonce: 10 }));
        assert_eq!(strict.tip().unwrap(), tip);
    }

    #[test]
    fn corrupt_record_surfaces_a_decoding_error() {
        let ledger = ledger();
        let block = ledger.add_block("soon corrupt").unwrap();
        ledger.store().insert_raw(&block.hash, &[0u8; 64]).unwrap();

        let mut it = ledger.iterator().unwrap();
        assert!(matches!(it.next(), Some(Err(LedgerError::Decoding(_)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn dangling_tip_surfaces_a_missing_block() {
        let ledger = ledger();
        ledger.store().insert_raw(b"l", &[0x42; 32]).unwrap();
        let mut it = ledger.iterator().unwrap();
        assert!(matches!(it.next(), Some(Err(LedgerError::MissingBlock(_)))));
    }

    #[test]
    fn tampered_block_is_reported() {
        let ledger = ledger();
        let mut block = ledger.add_block("honest").unwrap();
        block.data = b"forged".to_vec();
        let encoded = codec::encode(&block).unwrap();
        ledger.store().insert_raw(&block.hash, &encoded).unwrap();

        let mut it = ledger.iterator().unwrap();
        assert!(matches!(it.next(), Some(Err(LedgerError::Validation { .. }))));
        assert!(matches!(ledger.verify(), Err(LedgerError::Validation { .. })));
    }

    #[test]
    fn foreign_block_below_difficulty_fails_verify() {
        let ledger = ledger();
        // Re-seal the tip with a nonce that misses the target but keeps the digest honest.
        let genesis = chain(&ledger).pop().unwrap();
        let template = block::finalize("foreign", genesis.hash.to_vec(), 1);
        let prefix = template.digest_prefix(8);
        let nonce = (0u64..)
            .find(|n| !ledger.pow().meets_target(&block::digest(&prefix, *n)))
            .unwrap();
        let foreign = template.seal(nonce, block::digest(&prefix, nonce));
        ledger
            .store()
            .insert_raw(&foreign.hash, &codec::encode(&foreign).unwrap())
            .unwrap();
        ledger.store().insert_raw(b"l", &foreign.hash).unwrap();

        assert_eq!(chain(&ledger).len(), 2);
        match ledger.verify() {
            Err(LedgerError::Validation { hash, .. }) => assert_eq!(hash, foreign.hash_hex()),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn independent_ledgers_use_their_own_configuration() {
        let a = Ledger::open(MemoryStore::new(), config()).unwrap();
        let b = Ledger::open(
            MemoryStore::new(),
            LedgerConfig {
                difficulty_bits: 10,
                genesis_data: "other genesis".into(),
                tip_key: "tip".into(),
                ..config()
            },
        )
        .unwrap();
        assert_eq!(a.pow().difficulty_bits(), 8);
        assert_eq!(b.pow().difficulty_bits(), 10);
        assert!(b.store().read(b"tip").unwrap().is_some());
        assert!(b.store().read(b"l").unwrap().is_none());
        assert_eq!(chain(&b)[0].data, b"other genesis");
    }
}
