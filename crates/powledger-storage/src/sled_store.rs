use powledger_core::{LedgerError, PersistentStore, StoreError, StoreTxn};
use sled::transaction::{
  ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use sled::{Db, Tree};
use std::cell::RefCell;
use std::path::Path;
use tracing::{debug, info};

/// sled-backed store; each namespace is its own tree.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  tree: Tree,
}

fn backend(e: sled::Error) -> StoreError {
  StoreError::Backend(e.to_string())
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P, namespace: &str) -> Result<Self, StoreError> {
    let db = sled::open(path.as_ref()).map_err(backend)?;
    let store = Self::in_db(db, namespace)?;
    info!(path = %path.as_ref().display(), namespace, "sled store opened");
    Ok(store)
  }

  /// Another namespace in the same database.
  pub fn namespace(&self, namespace: &str) -> Result<Self, StoreError> {
    Self::in_db(self.db.clone(), namespace)
  }

  fn in_db(db: Db, namespace: &str) -> Result<Self, StoreError> {
    let tree = db.open_tree(namespace).map_err(backend)?;
    Ok(Self { db, tree })
  }

  pub fn len(&self) -> usize {
    self.tree.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tree.is_empty()
  }

  /// Flushes dirty pages to disk.
  pub fn close(&self) -> Result<(), StoreError> {
    self.db.flush().map_err(backend)?;
    Ok(())
  }

  /// Drops every entry in this namespace.
  pub fn clear(&self) -> Result<(), StoreError> {
    self.tree.clear().map_err(backend)?;
    self.close()
  }
}

/// Transactional view handed to ledger updates. sled faults are remembered so
/// conflicts can be handed back to sled, which then re-runs the update.
struct SledTxn<'a> {
  tree: &'a TransactionalTree,
  fault: RefCell<Option<UnabortableTransactionError>>,
}

impl SledTxn<'_> {
  fn fault(&self, e: UnabortableTransactionError) -> StoreError {
    let err = match &e {
      UnabortableTransactionError::Conflict => StoreError::Conflict,
      UnabortableTransactionError::Storage(inner) => StoreError::Backend(inner.to_string()),
    };
    self.fault.replace(Some(e));
    err
  }
}

impl StoreTxn for SledTxn<'_> {
  fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    match self.tree.get(key) {
      Ok(value) => Ok(value.map(|v| v.to_vec())),
      Err(e) => Err(self.fault(e)),
    }
  }

  fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
    match self.tree.insert(key, value) {
      Ok(_) => Ok(()),
      Err(e) => Err(self.fault(e)),
    }
  }
}

impl PersistentStore for SledStore {
  fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    let value = self.tree.get(key).map_err(backend)?;
    Ok(value.map(|v| v.to_vec()))
  }

  fn atomic_update<T, F>(&self, f: F) -> Result<T, LedgerError>
  where
    F: Fn(&dyn StoreTxn) -> Result<T, LedgerError>,
  {
    let outcome = self.tree.transaction(|tx| {
      let txn = SledTxn {
        tree: tx,
        fault: RefCell::new(None),
      };
      let result = f(&txn);
      match (result, txn.fault.into_inner()) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fault)) => Err(fault.into()),
        (Err(e), None) => Err(ConflictableTransactionError::Abort(e)),
      }
    });

    match outcome {
      Ok(value) => {
        self.tree.flush().map_err(backend)?;
        debug!("sled transaction committed");
        Ok(value)
      }
      Err(TransactionError::Abort(e)) => Err(e),
      Err(TransactionError::Storage(e)) => Err(backend(e).into()),
    }
  }
}
