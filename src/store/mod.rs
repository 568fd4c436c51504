//! The contract between the filesystem and any backing key-value store.
//!
//! A store is a flat namespace of string keys holding opaque byte blobs,
//! with a way to wipe everything and a transaction for each unit of work.
//! Transactions come in two capabilities modeled as two traits: read-only
//! ([`ReadTransaction`]) and read-write ([`WriteTransaction`], which adds
//! mutation plus `commit`/`abort`). Both a synchronous and an asynchronous
//! flavor of the whole contract exist; the filesystem engine is implemented
//! once per flavor on top of them.
//!
//! Stores need not provide serializable isolation between concurrent
//! transactions. The filesystem holds at most one transaction per operation
//! and relies only on a committed transaction being durable and an aborted
//! one leaving the store observably unchanged.

use async_trait::async_trait;

use crate::errors::Result;

pub(crate) mod memory;
pub(crate) mod simple;

/// A read-only transaction over a synchronous store.
pub trait ReadTransaction {
    /// Reads the blob under `key`. `None` means the key is absent, which is
    /// distinct from an empty blob.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// A read-write transaction over a synchronous store.
///
/// Every write transaction must reach a terminal state: exactly one of
/// [`commit`](WriteTransaction::commit) or [`abort`](WriteTransaction::abort),
/// both of which consume the transaction. After a successful `commit` the
/// changes are as durable as the store makes them; `abort` leaves the store
/// observably unchanged relative to the start of the transaction.
pub trait WriteTransaction: ReadTransaction {
    /// Writes `value` under `key`. With `overwrite` false an existing key is
    /// left untouched and `Ok(false)` is returned; with `overwrite` true the
    /// write always happens barring a store error.
    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool>;

    /// Deletes the blob under `key`, if any.
    fn del(&self, key: &str) -> Result<()>;

    /// Makes the transaction's writes permanent.
    fn commit(self) -> Result<()>;

    /// Discards the transaction's writes.
    fn abort(self) -> Result<()>;
}

/// A synchronous key-value store.
pub trait Store {
    /// The read-only transaction type.
    type ReadTxn: ReadTransaction;
    /// The read-write transaction type.
    type WriteTxn: WriteTransaction;

    /// A diagnostic name for the store.
    fn name(&self) -> &'static str;

    /// Empties every key in the store.
    fn clear(&self) -> Result<()>;

    /// Begins a read-only transaction.
    fn begin_read(&self) -> Self::ReadTxn;

    /// Begins a read-write transaction.
    fn begin_write(&self) -> Self::WriteTxn;
}

/// A read-only transaction over an asynchronous store.
#[async_trait]
pub trait AsyncReadTransaction: Send + Sync {
    /// Reads the blob under `key`. `None` means absent, distinct from empty.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// A read-write transaction over an asynchronous store.
///
/// The same terminal-state obligation as [`WriteTransaction`] applies.
#[async_trait]
pub trait AsyncWriteTransaction: AsyncReadTransaction {
    /// Writes `value` under `key`; see [`WriteTransaction::put`] for the
    /// `overwrite` contract.
    async fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool>;

    /// Deletes the blob under `key`, if any.
    async fn del(&self, key: &str) -> Result<()>;

    /// Makes the transaction's writes permanent.
    async fn commit(self) -> Result<()>;

    /// Discards the transaction's writes.
    async fn abort(self) -> Result<()>;
}

/// An asynchronous key-value store.
#[async_trait]
pub trait AsyncStore: Send + Sync {
    /// The read-only transaction type.
    type ReadTxn: AsyncReadTransaction;
    /// The read-write transaction type.
    type WriteTxn: AsyncWriteTransaction;

    /// A diagnostic name for the store.
    fn name(&self) -> &'static str;

    /// Empties every key in the store.
    async fn clear(&self) -> Result<()>;

    /// Begins a read-only transaction.
    fn begin_read(&self) -> Self::ReadTxn;

    /// Begins a read-write transaction.
    fn begin_write(&self) -> Self::WriteTxn;
}
