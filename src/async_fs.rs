//! The asynchronous filesystem engine.
//!
//! A mirror of [`KvFilesystem`](crate::KvFilesystem) over an [`AsyncStore`]:
//! the same one-transaction-per-operation discipline, with every store call
//! a suspension point. Each operation runs its body against the open
//! transaction and hands the outcome to [`finish_write`], which commits on
//! success and aborts before surfacing any error, so the caller observes
//! exactly one result and the store never keeps a half-applied operation.

use futures::future::try_join;
use log::debug;
use log::warn;

use crate::errors::Errno;
use crate::errors::FsError;
use crate::errors::Result;
use crate::inode::deserialize_listing;
use crate::inode::random_id;
use crate::inode::serialize_listing;
use crate::inode::DirListing;
use crate::inode::FileAttr;
use crate::inode::FileKind;
use crate::inode::Inode;
use crate::inode::ROOT_NODE_ID;
use crate::open_flags::OpenFlags;
use crate::path;
use crate::preload_file::AsyncPreloadFile;
use crate::store::AsyncReadTransaction;
use crate::store::AsyncStore;
use crate::store::AsyncWriteTransaction;
use crate::sync_fs::MAX_ID_ALLOCATION_ATTEMPTS;
use crate::sync_fs::ROOT_DIRECTORY_SIZE;

/// A filesystem whose entire persistent state lives in an asynchronous
/// key-value [`AsyncStore`].
pub struct AsyncKvFilesystem<S: AsyncStore> {
    store: S,
}

impl<S: AsyncStore> std::fmt::Debug for AsyncKvFilesystem<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncKvFilesystem")
            .field("store", &self.store.name())
            .finish()
    }
}

impl<S: AsyncStore> AsyncKvFilesystem<S> {
    /// Mounts a filesystem on `store`, creating the root directory if the
    /// store does not hold one yet.
    pub async fn new(store: S) -> Result<AsyncKvFilesystem<S>> {
        let fs = AsyncKvFilesystem { store };
        fs.make_root_directory().await?;
        Ok(fs)
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The backing store's diagnostic name.
    pub fn name(&self) -> &'static str {
        self.store.name()
    }

    /// This filesystem accepts writes.
    pub fn is_read_only(&self) -> bool {
        false
    }

    /// Symbolic links are not supported.
    pub fn supports_symlinks(&self) -> bool {
        false
    }

    /// Extended properties are not supported.
    pub fn supports_props(&self) -> bool {
        false
    }

    /// Operations suspend; there is no synchronous surface.
    pub fn supports_synch(&self) -> bool {
        false
    }

    /// Wipes the store and re-creates an empty root directory.
    pub async fn empty(&self) -> Result<()> {
        self.store.clear().await?;
        self.make_root_directory().await
    }

    /// Stats of the object at `p`.
    pub async fn stat(&self, p: &str) -> Result<FileAttr> {
        let tx = self.store.begin_read();
        Ok(resolve_inode(&tx, p).await?.attrs())
    }

    /// Identical to [`stat`](AsyncKvFilesystem::stat).
    pub async fn lstat(&self, p: &str) -> Result<FileAttr> {
        self.stat(p).await
    }

    /// Creates an empty regular file at `p` and returns a handle to it.
    pub async fn create_file(
        &self,
        p: &str,
        flag: OpenFlags,
        mode: u32,
    ) -> Result<AsyncPreloadFile<'_, S>> {
        debug!("create_file() called with {p:?} mode {mode:o}");
        let inode = self.commit_new_file(p, FileKind::File, mode, &[]).await?;
        Ok(AsyncPreloadFile::new(self, p, flag, inode.attrs(), Vec::new()))
    }

    /// Opens the file at `p`, preloading its contents into the handle.
    pub async fn open_file(&self, p: &str, flag: OpenFlags) -> Result<AsyncPreloadFile<'_, S>> {
        let tx = self.store.begin_read();
        let inode = resolve_inode(&tx, p).await?;
        let data = tx
            .get(&inode.data_id)
            .await?
            .ok_or_else(|| FsError::corrupt(p))?;
        Ok(AsyncPreloadFile::new(self, p, flag, inode.attrs(), data))
    }

    /// Removes the regular file at `p`.
    pub async fn unlink(&self, p: &str) -> Result<()> {
        debug!("unlink() called with {p:?}");
        self.remove_entry(p, false).await
    }

    /// Removes the empty directory at `p`.
    pub async fn rmdir(&self, p: &str) -> Result<()> {
        debug!("rmdir() called with {p:?}");
        if !self.readdir(p).await?.is_empty() {
            return Err(FsError::new(Errno::ENOTEMPTY, p));
        }
        self.remove_entry(p, true).await
    }

    /// Creates an empty directory at `p`.
    pub async fn mkdir(&self, p: &str, mode: u32) -> Result<()> {
        debug!("mkdir() called with {p:?} mode {mode:o}");
        let data = serialize_listing(&DirListing::new())?;
        self.commit_new_file(p, FileKind::Directory, mode, &data)
            .await?;
        Ok(())
    }

    /// Names of the entries in the directory at `p`. Ordering is
    /// unspecified.
    pub async fn readdir(&self, p: &str) -> Result<Vec<String>> {
        let tx = self.store.begin_read();
        let inode = resolve_inode(&tx, p).await?;
        let listing = get_dir_listing(&tx, p, &inode).await?;
        Ok(listing.into_keys().collect())
    }

    /// Moves the object at `old_path` to `new_path`.
    ///
    /// Semantics match the synchronous engine. When the two parent
    /// directories differ their inodes and listings are fetched
    /// concurrently; the first fetch to fail wins, and the transaction is
    /// aborted exactly once.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        debug!("rename() called with {old_path:?} -> {new_path:?}");
        let new_parent = path::dirname(new_path);
        if path::is_under(new_parent, old_path) {
            return Err(FsError::new(Errno::EBUSY, old_path));
        }
        let tx = self.store.begin_write();
        let result = rename_inner(&tx, old_path, new_path).await;
        finish_write(tx, result).await
    }

    /// Writes a file's buffered contents and merged stats back to the store.
    /// Invoked by file handles on flush and close.
    pub async fn sync(&self, p: &str, data: &[u8], stats: &FileAttr) -> Result<()> {
        debug!("sync() called with {p:?} ({} bytes)", data.len());
        let tx = self.store.begin_write();
        let result = sync_inner(&tx, p, data, stats).await;
        finish_write(tx, result).await
    }

    async fn make_root_directory(&self) -> Result<()> {
        let tx = self.store.begin_write();
        let result = make_root_inner(&tx).await;
        finish_write(tx, result).await
    }

    async fn commit_new_file(
        &self,
        p: &str,
        kind: FileKind,
        mode: u32,
        data: &[u8],
    ) -> Result<Inode> {
        if p == "/" {
            return Err(FsError::new(Errno::EEXIST, p));
        }
        let tx = self.store.begin_write();
        let result = commit_new_file_inner(&tx, p, kind, mode, data).await;
        finish_write(tx, result).await
    }

    async fn remove_entry(&self, p: &str, is_dir: bool) -> Result<()> {
        let tx = self.store.begin_write();
        let result = remove_entry_inner(&tx, p, is_dir).await;
        finish_write(tx, result).await
    }
}

/// Commits on success, aborts on error. The original error surfaces even if
/// the abort itself fails; that secondary failure is only logged.
async fn finish_write<T: AsyncWriteTransaction, R>(tx: T, result: Result<R>) -> Result<R> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = tx.abort().await {
                warn!("transaction abort failed after {err}: {abort_err}");
            }
            Err(err)
        }
    }
}

async fn get_inode<T: AsyncReadTransaction>(tx: &T, p: &str, id: &str) -> Result<Inode> {
    let blob = tx
        .get(id)
        .await?
        .ok_or_else(|| FsError::new(Errno::ENOENT, p))?;
    Inode::from_bytes(&blob)
}

async fn get_dir_listing<T: AsyncReadTransaction>(
    tx: &T,
    p: &str,
    inode: &Inode,
) -> Result<DirListing> {
    if !inode.is_directory() {
        return Err(FsError::new(Errno::ENOTDIR, p));
    }
    let blob = tx
        .get(&inode.data_id)
        .await?
        .ok_or_else(|| FsError::corrupt(p))?;
    deserialize_listing(&blob)
}

async fn resolve_node_id<T: AsyncReadTransaction>(tx: &T, p: &str) -> Result<String> {
    let mut id = ROOT_NODE_ID.to_string();
    for component in p.split('/').filter(|c| !c.is_empty()) {
        let inode = get_inode(tx, p, &id).await?;
        let listing = get_dir_listing(tx, p, &inode).await?;
        id = listing
            .get(component)
            .cloned()
            .ok_or_else(|| FsError::new(Errno::ENOENT, p))?;
    }
    Ok(id)
}

async fn resolve_inode<T: AsyncReadTransaction>(tx: &T, p: &str) -> Result<Inode> {
    let id = resolve_node_id(tx, p).await?;
    get_inode(tx, p, &id).await
}

/// A directory's inode and listing, fetched together. Both halves of an
/// async rename run this concurrently.
async fn fetch_dir<T: AsyncReadTransaction>(tx: &T, p: &str) -> Result<(Inode, DirListing)> {
    let id = resolve_node_id(tx, p).await?;
    let inode = get_inode(tx, p, &id).await?;
    let listing = get_dir_listing(tx, p, &inode).await?;
    Ok((inode, listing))
}

async fn add_new_node<T: AsyncWriteTransaction>(tx: &T, data: &[u8]) -> Result<String> {
    for _ in 0..MAX_ID_ALLOCATION_ATTEMPTS {
        let id = random_id();
        if tx.put(&id, data, false).await? {
            return Ok(id);
        }
    }
    Err(FsError::store("unable to allocate a fresh node id"))
}

async fn make_root_inner<T: AsyncWriteTransaction>(tx: &T) -> Result<()> {
    if tx.get(ROOT_NODE_ID).await?.is_some() {
        return Ok(());
    }
    let listing = serialize_listing(&DirListing::new())?;
    let data_id = add_new_node(tx, &listing).await?;
    let inode = Inode::new(data_id, ROOT_DIRECTORY_SIZE, 0o777, FileKind::Directory);
    tx.put(ROOT_NODE_ID, &inode.to_bytes()?, false).await?;
    Ok(())
}

async fn commit_new_file_inner<T: AsyncWriteTransaction>(
    tx: &T,
    p: &str,
    kind: FileKind,
    mode: u32,
    data: &[u8],
) -> Result<Inode> {
    let parent = path::dirname(p);
    let name = path::basename(p);

    let (parent_inode, mut listing) = fetch_dir(tx, parent).await?;
    if listing.contains_key(name) {
        return Err(FsError::new(Errno::EEXIST, p));
    }

    let data_id = add_new_node(tx, data).await?;
    let inode = Inode::new(data_id, data.len() as u64, mode, kind);
    let inode_id = add_new_node(tx, &inode.to_bytes()?).await?;

    listing.insert(name.to_string(), inode_id);
    tx.put(&parent_inode.data_id, &serialize_listing(&listing)?, true)
        .await?;
    Ok(inode)
}

async fn remove_entry_inner<T: AsyncWriteTransaction>(
    tx: &T,
    p: &str,
    is_dir: bool,
) -> Result<()> {
    let parent = path::dirname(p);
    let name = path::basename(p);

    let (parent_inode, mut listing) = fetch_dir(tx, parent).await?;
    let child_id = listing
        .remove(name)
        .ok_or_else(|| FsError::new(Errno::ENOENT, p))?;
    let child_inode = get_inode(tx, p, &child_id).await?;
    if !is_dir && child_inode.is_directory() {
        return Err(FsError::new(Errno::EISDIR, p));
    }
    if is_dir && !child_inode.is_directory() {
        return Err(FsError::new(Errno::ENOTDIR, p));
    }

    tx.del(&child_inode.data_id).await?;
    tx.del(&child_id).await?;
    tx.put(&parent_inode.data_id, &serialize_listing(&listing)?, true)
        .await?;
    Ok(())
}

async fn rename_inner<T: AsyncWriteTransaction>(
    tx: &T,
    old_path: &str,
    new_path: &str,
) -> Result<()> {
    let old_parent = path::dirname(old_path);
    let old_name = path::basename(old_path);
    let new_parent = path::dirname(new_path);
    let new_name = path::basename(new_path);

    let old_parent_inode;
    let mut old_listing;
    let mut new_dir: Option<(Inode, DirListing)>;
    if old_parent == new_parent {
        let (inode, listing) = fetch_dir(tx, old_parent).await?;
        old_parent_inode = inode;
        old_listing = listing;
        new_dir = None;
    } else {
        let ((old_inode, old), (new_inode, new)) =
            try_join(fetch_dir(tx, old_parent), fetch_dir(tx, new_parent)).await?;
        old_parent_inode = old_inode;
        old_listing = old;
        new_dir = Some((new_inode, new));
    }

    let node_id = old_listing
        .remove(old_name)
        .ok_or_else(|| FsError::new(Errno::ENOENT, old_path))?;

    let target_listing = match &mut new_dir {
        Some((_, listing)) => listing,
        None => &mut old_listing,
    };
    if let Some(existing_id) = target_listing.get(new_name).cloned() {
        let existing = get_inode(tx, new_path, &existing_id).await?;
        if existing.is_directory() {
            return Err(FsError::new(Errno::EPERM, new_path));
        }
        tx.del(&existing.data_id).await?;
        tx.del(&existing_id).await?;
    }
    target_listing.insert(new_name.to_string(), node_id);

    tx.put(
        &old_parent_inode.data_id,
        &serialize_listing(&old_listing)?,
        true,
    )
    .await?;
    if let Some((inode, listing)) = &new_dir {
        tx.put(&inode.data_id, &serialize_listing(listing)?, true)
            .await?;
    }
    Ok(())
}

async fn sync_inner<T: AsyncWriteTransaction>(
    tx: &T,
    p: &str,
    data: &[u8],
    stats: &FileAttr,
) -> Result<()> {
    let node_id = resolve_node_id(tx, p).await?;
    let mut inode = get_inode(tx, p, &node_id).await?;
    let inode_changed = inode.update(stats);
    // The data blob is rewritten even for metadata-only flushes.
    tx.put(&inode.data_id, data, true).await?;
    if inode_changed {
        tx.put(&node_id, &inode.to_bytes()?, true).await?;
    }
    Ok(())
}
