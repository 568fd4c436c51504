//! Transactions for stores that have none of their own.
//!
//! A [`SimpleStore`] is the smallest useful surface: unbuffered `get`, `put`,
//! and `del`. [`SimpleTransactionStore`] layers the full [`Store`] contract
//! on top by applying writes to the backing store immediately and keeping an
//! undo log: the first time a transaction touches a key, the key's current
//! value (or its absence) is stashed, and `abort` walks the modified keys in
//! reverse first-modification order restoring what was stashed. `commit` is a
//! no-op since the writes already happened.
//!
//! Writes are therefore visible to other readers of the same backing store
//! before `commit`. The filesystem tolerates this because it never runs
//! concurrent transactions; each transaction likewise assumes it is driven
//! from one thread at a time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::Result;
use crate::store::AsyncReadTransaction;
use crate::store::AsyncStore;
use crate::store::AsyncWriteTransaction;
use crate::store::ReadTransaction;
use crate::store::Store;
use crate::store::WriteTransaction;

/// An unbuffered synchronous key-value store: no transactions, every call
/// takes effect immediately.
pub trait SimpleStore {
    /// A diagnostic name for the store.
    fn name(&self) -> &'static str;

    /// Empties every key.
    fn clear(&self) -> Result<()>;

    /// Reads the blob under `key`; `None` means absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` under `key`. With `overwrite` false an existing key is
    /// left alone and `Ok(false)` returned.
    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool>;

    /// Deletes the blob under `key`, if any.
    fn del(&self, key: &str) -> Result<()>;
}

/// The asynchronous twin of [`SimpleStore`].
#[async_trait]
pub trait AsyncSimpleStore: Send + Sync {
    /// A diagnostic name for the store.
    fn name(&self) -> &'static str;

    /// Empties every key.
    async fn clear(&self) -> Result<()>;

    /// Reads the blob under `key`; `None` means absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` under `key`; `Ok(false)` when `overwrite` is false and
    /// the key already exists.
    async fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool>;

    /// Deletes the blob under `key`, if any.
    async fn del(&self, key: &str) -> Result<()>;
}

/// Original values of touched keys, in first-touch order for the keys that
/// were actually modified. `None` marks a key that was absent at first touch.
#[derive(Default)]
struct UndoLog {
    originals: HashMap<String, Option<Vec<u8>>>,
    modified: Vec<String>,
}

impl UndoLog {
    fn stash(&mut self, key: &str, original: Option<Vec<u8>>) {
        if !self.originals.contains_key(key) {
            self.originals.insert(key.to_string(), original);
        }
    }

    fn mark_modified(&mut self, key: &str) {
        if !self.modified.iter().any(|k| k == key) {
            self.modified.push(key.to_string());
        }
    }

    fn is_stashed(&self, key: &str) -> bool {
        self.originals.contains_key(key)
    }
}

/// Adapts a [`SimpleStore`] into a transactional [`Store`].
pub struct SimpleTransactionStore<S> {
    store: Arc<S>,
}

impl<S> SimpleTransactionStore<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> SimpleTransactionStore<S> {
        SimpleTransactionStore {
            store: Arc::new(store),
        }
    }
}

impl<S> Clone for SimpleTransactionStore<S> {
    fn clone(&self) -> Self {
        SimpleTransactionStore {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SimpleStore> fmt::Debug for SimpleTransactionStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleTransactionStore")
            .field("store", &self.store.name())
            .finish()
    }
}

impl<S: SimpleStore> Store for SimpleTransactionStore<S> {
    type ReadTxn = SimpleReadTransaction<S>;
    type WriteTxn = SimpleWriteTransaction<S>;

    fn name(&self) -> &'static str {
        self.store.name()
    }

    fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    fn begin_read(&self) -> SimpleReadTransaction<S> {
        SimpleReadTransaction {
            store: Arc::clone(&self.store),
        }
    }

    fn begin_write(&self) -> SimpleWriteTransaction<S> {
        SimpleWriteTransaction {
            store: Arc::clone(&self.store),
            undo: Mutex::new(UndoLog::default()),
        }
    }
}

/// Read-only pass-through transaction over a [`SimpleStore`].
pub struct SimpleReadTransaction<S> {
    store: Arc<S>,
}

impl<S> fmt::Debug for SimpleReadTransaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleReadTransaction").finish_non_exhaustive()
    }
}

impl<S: SimpleStore> ReadTransaction for SimpleReadTransaction<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key)
    }
}

/// Write-through transaction with an undo log over a [`SimpleStore`].
pub struct SimpleWriteTransaction<S> {
    store: Arc<S>,
    undo: Mutex<UndoLog>,
}

impl<S> fmt::Debug for SimpleWriteTransaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleWriteTransaction").finish_non_exhaustive()
    }
}

impl<S: SimpleStore> SimpleWriteTransaction<S> {
    /// Captures `key`'s current value before its first modification and
    /// records it in the modified set.
    fn remember(&self, key: &str) -> Result<()> {
        if !self.undo.lock().is_stashed(key) {
            let current = self.store.get(key)?;
            self.undo.lock().stash(key, current);
        }
        self.undo.lock().mark_modified(key);
        Ok(())
    }
}

impl<S: SimpleStore> ReadTransaction for SimpleWriteTransaction<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.store.get(key)?;
        self.undo.lock().stash(key, value.clone());
        Ok(value)
    }
}

impl<S: SimpleStore> WriteTransaction for SimpleWriteTransaction<S> {
    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool> {
        self.remember(key)?;
        self.store.put(key, value, overwrite)
    }

    fn del(&self, key: &str) -> Result<()> {
        self.remember(key)?;
        self.store.del(key)
    }

    fn commit(self) -> Result<()> {
        // Writes already landed in the backing store.
        Ok(())
    }

    fn abort(self) -> Result<()> {
        let undo = self.undo.into_inner();
        for key in undo.modified.iter().rev() {
            match undo.originals.get(key) {
                Some(Some(original)) => {
                    self.store.put(key, original, true)?;
                }
                Some(None) => self.store.del(key)?,
                None => {}
            }
        }
        Ok(())
    }
}

/// Adapts an [`AsyncSimpleStore`] into a transactional [`AsyncStore`].
pub struct AsyncSimpleTransactionStore<S> {
    store: Arc<S>,
}

impl<S> AsyncSimpleTransactionStore<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> AsyncSimpleTransactionStore<S> {
        AsyncSimpleTransactionStore {
            store: Arc::new(store),
        }
    }
}

impl<S> Clone for AsyncSimpleTransactionStore<S> {
    fn clone(&self) -> Self {
        AsyncSimpleTransactionStore {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AsyncSimpleStore> fmt::Debug for AsyncSimpleTransactionStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSimpleTransactionStore")
            .field("store", &self.store.name())
            .finish()
    }
}

#[async_trait]
impl<S: AsyncSimpleStore + 'static> AsyncStore for AsyncSimpleTransactionStore<S> {
    type ReadTxn = AsyncSimpleReadTransaction<S>;
    type WriteTxn = AsyncSimpleWriteTransaction<S>;

    fn name(&self) -> &'static str {
        self.store.name()
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    fn begin_read(&self) -> AsyncSimpleReadTransaction<S> {
        AsyncSimpleReadTransaction {
            store: Arc::clone(&self.store),
        }
    }

    fn begin_write(&self) -> AsyncSimpleWriteTransaction<S> {
        AsyncSimpleWriteTransaction {
            store: Arc::clone(&self.store),
            undo: Mutex::new(UndoLog::default()),
        }
    }
}

/// Read-only pass-through transaction over an [`AsyncSimpleStore`].
pub struct AsyncSimpleReadTransaction<S> {
    store: Arc<S>,
}

impl<S> fmt::Debug for AsyncSimpleReadTransaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSimpleReadTransaction")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: AsyncSimpleStore> AsyncReadTransaction for AsyncSimpleReadTransaction<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }
}

/// Write-through transaction with an undo log over an [`AsyncSimpleStore`].
pub struct AsyncSimpleWriteTransaction<S> {
    store: Arc<S>,
    undo: Mutex<UndoLog>,
}

impl<S> fmt::Debug for AsyncSimpleWriteTransaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSimpleWriteTransaction")
            .finish_non_exhaustive()
    }
}

impl<S: AsyncSimpleStore> AsyncSimpleWriteTransaction<S> {
    async fn remember(&self, key: &str) -> Result<()> {
        if !self.undo.lock().is_stashed(key) {
            let current = self.store.get(key).await?;
            self.undo.lock().stash(key, current);
        }
        self.undo.lock().mark_modified(key);
        Ok(())
    }
}

#[async_trait]
impl<S: AsyncSimpleStore> AsyncReadTransaction for AsyncSimpleWriteTransaction<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.store.get(key).await?;
        self.undo.lock().stash(key, value.clone());
        Ok(value)
    }
}

#[async_trait]
impl<S: AsyncSimpleStore> AsyncWriteTransaction for AsyncSimpleWriteTransaction<S> {
    async fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool> {
        self.remember(key).await?;
        self.store.put(key, value, overwrite).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.remember(key).await?;
        self.store.del(key).await
    }

    async fn commit(self) -> Result<()> {
        Ok(())
    }

    async fn abort(self) -> Result<()> {
        let undo = self.undo.into_inner();
        for key in undo.modified.iter().rev() {
            match undo.originals.get(key) {
                Some(Some(original)) => {
                    self.store.put(key, original, true).await?;
                }
                Some(None) => self.store.del(key).await?,
                None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn store_with(entries: &[(&str, &[u8])]) -> (InMemoryStore, SimpleTransactionStore<InMemoryStore>) {
        let backing = InMemoryStore::new();
        for (key, value) in entries {
            backing.put(key, value, true).unwrap();
        }
        (backing.clone(), SimpleTransactionStore::new(backing))
    }

    #[test]
    fn commit_keeps_writes() {
        let (backing, store) = store_with(&[]);
        let tx = store.begin_write();
        assert!(tx.put("a", b"1", false).unwrap());
        tx.commit().unwrap();
        assert_eq!(backing.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn abort_deletes_keys_created_in_the_transaction() {
        let (backing, store) = store_with(&[]);
        let tx = store.begin_write();
        assert!(tx.put("a", b"1", false).unwrap());
        tx.abort().unwrap();
        assert_eq!(backing.get("a").unwrap(), None);
    }

    #[test]
    fn abort_restores_overwritten_values() {
        let (backing, store) = store_with(&[("a", b"old")]);
        let tx = store.begin_write();
        assert!(tx.put("a", b"new", true).unwrap());
        assert_eq!(backing.get("a").unwrap(), Some(b"new".to_vec()));
        tx.abort().unwrap();
        assert_eq!(backing.get("a").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn abort_restores_deleted_values() {
        let (backing, store) = store_with(&[("a", b"old")]);
        let tx = store.begin_write();
        tx.del("a").unwrap();
        assert_eq!(backing.get("a").unwrap(), None);
        tx.abort().unwrap();
        assert_eq!(backing.get("a").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn abort_keeps_the_value_seen_at_first_touch() {
        // A get before the write must pin the original, and repeated writes
        // to the same key must not clobber it.
        let (backing, store) = store_with(&[("a", b"first")]);
        let tx = store.begin_write();
        assert_eq!(tx.get("a").unwrap(), Some(b"first".to_vec()));
        assert!(tx.put("a", b"second", true).unwrap());
        assert!(tx.put("a", b"third", true).unwrap());
        tx.del("a").unwrap();
        tx.abort().unwrap();
        assert_eq!(backing.get("a").unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn abort_restores_many_keys() {
        let (backing, store) = store_with(&[("a", b"1"), ("b", b"2")]);
        let tx = store.begin_write();
        tx.put("a", b"x", true).unwrap();
        tx.del("b").unwrap();
        tx.put("c", b"3", false).unwrap();
        tx.abort().unwrap();
        assert_eq!(backing.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(backing.get("b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backing.get("c").unwrap(), None);
    }

    #[test]
    fn put_without_overwrite_leaves_existing_keys() {
        let (backing, store) = store_with(&[("a", b"old")]);
        let tx = store.begin_write();
        assert!(!tx.put("a", b"new", false).unwrap());
        assert_eq!(backing.get("a").unwrap(), Some(b"old".to_vec()));
        tx.commit().unwrap();
        assert_eq!(backing.get("a").unwrap(), Some(b"old".to_vec()));
    }

    #[tokio::test]
    async fn async_abort_restores_originals() {
        use crate::store::memory::AsyncInMemoryStore;

        let backing = AsyncInMemoryStore::new();
        backing.put("a", b"old", true).await.unwrap();
        let store = AsyncSimpleTransactionStore::new(backing.clone());

        let tx = store.begin_write();
        assert!(tx.put("a", b"new", true).await.unwrap());
        assert!(tx.put("b", b"fresh", false).await.unwrap());
        tx.abort().await.unwrap();

        assert_eq!(backing.get("a").await.unwrap(), Some(b"old".to_vec()));
        assert_eq!(backing.get("b").await.unwrap(), None);
    }
}
