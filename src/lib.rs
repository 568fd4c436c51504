//! Filesystem layered over a generic key-value store
//!
//! This crate implements a POSIX-flavored hierarchical filesystem whose
//! entire persistent state lives as opaque byte blobs under string keys in a
//! pluggable backing store. Inodes, directory listings, and file contents
//! are each one keyed blob; path operations translate into ordered sequences
//! of transactional get/put/del calls, so a failed operation rolls back and
//! leaves the store unchanged.
//!
//! Two flavors share the same data model: [`KvFilesystem`] drives a
//! synchronous [`Store`], and [`AsyncKvFilesystem`] drives an [`AsyncStore`]
//! where every store call is a suspension point. Backing stores that have no
//! transactions of their own plug in through [`SimpleTransactionStore`],
//! which adds rollback on top of a plain get/put/del interface; an
//! in-memory reference store is included for both flavors.
//!
//! # Example
//!
//! ```
//! use kvfs::{InMemoryStore, KvFilesystem, OpenFlags, SimpleTransactionStore};
//!
//! let store = SimpleTransactionStore::new(InMemoryStore::new());
//! let fs = KvFilesystem::new(store).unwrap();
//!
//! fs.mkdir("/logs", 0o755).unwrap();
//! let mut file = fs
//!     .create_file("/logs/today", OpenFlags::READ | OpenFlags::WRITE, 0o644)
//!     .unwrap();
//! file.write(b"hello").unwrap();
//! file.close().unwrap();
//!
//! assert_eq!(fs.readdir("/logs").unwrap(), ["today"]);
//! assert_eq!(fs.stat("/logs/today").unwrap().size, 5);
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::async_fs::AsyncKvFilesystem;
pub use crate::errors::Errno;
pub use crate::errors::FsError;
pub use crate::errors::Result;
pub use crate::inode::deserialize_listing;
pub use crate::inode::serialize_listing;
pub use crate::inode::DirListing;
pub use crate::inode::FileAttr;
pub use crate::inode::FileKind;
pub use crate::inode::Inode;
pub use crate::inode::ROOT_NODE_ID;
pub use crate::inode::S_IFDIR;
pub use crate::inode::S_IFMT;
pub use crate::inode::S_IFREG;
pub use crate::open_flags::OpenFlags;
pub use crate::preload_file::AsyncPreloadFile;
pub use crate::preload_file::PreloadFile;
pub use crate::store::memory::AsyncInMemoryStore;
pub use crate::store::memory::InMemoryStore;
pub use crate::store::simple::AsyncSimpleReadTransaction;
pub use crate::store::simple::AsyncSimpleStore;
pub use crate::store::simple::AsyncSimpleTransactionStore;
pub use crate::store::simple::AsyncSimpleWriteTransaction;
pub use crate::store::simple::SimpleReadTransaction;
pub use crate::store::simple::SimpleStore;
pub use crate::store::simple::SimpleTransactionStore;
pub use crate::store::simple::SimpleWriteTransaction;
pub use crate::store::AsyncReadTransaction;
pub use crate::store::AsyncStore;
pub use crate::store::AsyncWriteTransaction;
pub use crate::store::ReadTransaction;
pub use crate::store::Store;
pub use crate::store::WriteTransaction;
pub use crate::sync_fs::KvFilesystem;

mod async_fs;
mod errors;
mod inode;
mod open_flags;
pub mod path;
mod preload_file;
mod store;
mod sync_fs;
mod time;
