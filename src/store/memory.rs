//! Reference in-memory stores: a `HashMap` behind a mutex.
//!
//! These back the test suites and serve as the model implementation of the
//! simple-store contracts. Cloning shares the underlying map.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::Result;
use crate::store::simple::AsyncSimpleStore;
use crate::store::simple::SimpleStore;

/// A synchronous in-memory key-value store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    db: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.db.lock().len()
    }

    /// Whether the store holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.db.lock().is_empty()
    }

    /// A sorted snapshot of the entire store, for diagnostics and for tests
    /// asserting byte-identity across failed operations.
    pub fn dump(&self) -> BTreeMap<String, Vec<u8>> {
        self.db
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl SimpleStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn clear(&self) -> Result<()> {
        self.db.lock().clear();
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool> {
        let mut db = self.db.lock();
        if !overwrite && db.contains_key(key) {
            return Ok(false);
        }
        db.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    fn del(&self, key: &str) -> Result<()> {
        self.db.lock().remove(key);
        Ok(())
    }
}

/// An asynchronous in-memory key-value store. Every operation completes
/// immediately; the async surface exists to exercise the async engine.
#[derive(Debug, Clone, Default)]
pub struct AsyncInMemoryStore {
    inner: InMemoryStore,
}

impl AsyncInMemoryStore {
    /// An empty store.
    pub fn new() -> AsyncInMemoryStore {
        AsyncInMemoryStore::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// A sorted snapshot of the entire store.
    pub fn dump(&self) -> BTreeMap<String, Vec<u8>> {
        self.inner.dump()
    }
}

#[async_trait]
impl AsyncSimpleStore for AsyncInMemoryStore {
    fn name(&self) -> &'static str {
        "async-in-memory"
    }

    async fn clear(&self) -> Result<()> {
        SimpleStore::clear(&self.inner)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        SimpleStore::get(&self.inner, key)
    }

    async fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool> {
        SimpleStore::put(&self.inner, key, value, overwrite)
    }

    async fn del(&self, key: &str) -> Result<()> {
        SimpleStore::del(&self.inner, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_is_distinct_from_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.put("k", b"", true).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn put_respects_overwrite() {
        let store = InMemoryStore::new();
        assert!(store.put("k", b"a", false).unwrap());
        assert!(!store.put("k", b"b", false).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(b"a".to_vec()));
        assert!(store.put("k", b"b", true).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn clones_share_contents() {
        let store = InMemoryStore::new();
        let alias = store.clone();
        store.put("k", b"v", true).unwrap();
        assert_eq!(alias.get("k").unwrap(), Some(b"v".to_vec()));
        alias.clear().unwrap();
        assert!(store.is_empty());
    }
}
