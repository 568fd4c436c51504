//! The synchronous filesystem engine.
//!
//! Every operation follows the same shape: begin a transaction, read what it
//! needs, compute the updated blobs in memory, write them, commit. Any error
//! after a write transaction has been opened aborts it before surfacing, so
//! a failed operation leaves the store observably unchanged.

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
use crate::preload_file::PreloadFile;
use crate::store::ReadTransaction;
use crate::store::Store;
use crate::store::WriteTransaction;

/// Give up allocating a fresh random id after this many collisions. With 122
/// bits of entropy the retry loop exists only to keep a broken random source
/// from spinning forever.
pub(crate) const MAX_ID_ALLOCATION_ATTEMPTS: usize = 5;

/// Size reported for the root directory.
pub(crate) const ROOT_DIRECTORY_SIZE: u64 = 4096;

/// A filesystem whose entire persistent state lives in a synchronous
/// key-value [`Store`].
pub struct KvFilesystem<S: Store> {
    store: S,
}

impl<S: Store> std::fmt::Debug for KvFilesystem<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvFilesystem")
            .field("store", &self.store.name())
            .finish()
    }
}

impl<S: Store> KvFilesystem<S> {
    /// Mounts a filesystem on `store`, creating the root directory if the
    /// store does not hold one yet.
    pub fn new(store: S) -> Result<KvFilesystem<S>> {
        let fs = KvFilesystem { store };
        fs.make_root_directory()?;
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

    /// Operations complete synchronously.
    pub fn supports_synch(&self) -> bool {
        true
    }

    /// Wipes the store and re-creates an empty root directory.
    pub fn empty(&self) -> Result<()> {
        self.store.clear()?;
        self.make_root_directory()
    }

    /// Stats of the object at `p`.
    pub fn stat(&self, p: &str) -> Result<FileAttr> {
        let tx = self.store.begin_read();
        Ok(resolve_inode(&tx, p)?.attrs())
    }

    /// Identical to [`stat`](KvFilesystem::stat); there are no symbolic
    /// links to not follow.
    pub fn lstat(&self, p: &str) -> Result<FileAttr> {
        self.stat(p)
    }

    /// Creates an empty regular file at `p` and returns a handle to it.
    pub fn create_file(&self, p: &str, flag: OpenFlags, mode: u32) -> Result<PreloadFile<'_, S>> {
        debug!("create_file() called with {p:?} mode {mode:o}");
        let inode = self.commit_new_file(p, FileKind::File, mode, &[])?;
        Ok(PreloadFile::new(self, p, flag, inode.attrs(), Vec::new()))
    }

    /// Opens the file at `p`, preloading its contents into the handle.
    pub fn open_file(&self, p: &str, flag: OpenFlags) -> Result<PreloadFile<'_, S>> {
        let tx = self.store.begin_read();
        let inode = resolve_inode(&tx, p)?;
        let data = tx
            .get(&inode.data_id)?
            .ok_or_else(|| FsError::corrupt(p))?;
        Ok(PreloadFile::new(self, p, flag, inode.attrs(), data))
    }

    /// Removes the regular file at `p`.
    pub fn unlink(&self, p: &str) -> Result<()> {
        debug!("unlink() called with {p:?}");
        self.remove_entry(p, false)
    }

    /// Removes the empty directory at `p`.
    pub fn rmdir(&self, p: &str) -> Result<()> {
        debug!("rmdir() called with {p:?}");
        if !self.readdir(p)?.is_empty() {
            return Err(FsError::new(Errno::ENOTEMPTY, p));
        }
        self.remove_entry(p, true)
    }

    /// Creates an empty directory at `p`.
    pub fn mkdir(&self, p: &str, mode: u32) -> Result<()> {
        debug!("mkdir() called with {p:?} mode {mode:o}");
        let data = serialize_listing(&DirListing::new())?;
        self.commit_new_file(p, FileKind::Directory, mode, &data)?;
        Ok(())
    }

    /// Names of the entries in the directory at `p`. Ordering is
    /// unspecified.
    pub fn readdir(&self, p: &str) -> Result<Vec<String>> {
        let tx = self.store.begin_read();
        let inode = resolve_inode(&tx, p)?;
        let listing = get_dir_listing(&tx, p, &inode)?;
        Ok(listing.into_keys().collect())
    }

    /// Moves the object at `old_path` to `new_path`.
    ///
    /// An existing regular file at `new_path` is replaced and its blobs
    /// freed; an existing directory there fails with `EPERM`. Moving a
    /// directory into itself or a descendant fails with `EBUSY` before any
    /// store traffic happens.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        debug!("rename() called with {old_path:?} -> {new_path:?}");
        let new_parent = path::dirname(new_path);
        if path::is_under(new_parent, old_path) {
            return Err(FsError::new(Errno::EBUSY, old_path));
        }
        let tx = self.store.begin_write();
        let result = rename_inner(&tx, old_path, new_path);
        finish_write(tx, result)
    }

    /// Writes a file's buffered contents and merged stats back to the store.
    /// Invoked by file handles on flush and close.
    pub fn sync(&self, p: &str, data: &[u8], stats: &FileAttr) -> Result<()> {
        debug!("sync() called with {p:?} ({} bytes)", data.len());
        let tx = self.store.begin_write();
        let result = sync_inner(&tx, p, data, stats);
        finish_write(tx, result)
    }

    fn make_root_directory(&self) -> Result<()> {
        let tx = self.store.begin_write();
        let result = make_root_inner(&tx);
        finish_write(tx, result)
    }

    fn commit_new_file(&self, p: &str, kind: FileKind, mode: u32, data: &[u8]) -> Result<Inode> {
        if p == "/" {
            return Err(FsError::new(Errno::EEXIST, p));
        }
        let tx = self.store.begin_write();
        let result = commit_new_file_inner(&tx, p, kind, mode, data);
        finish_write(tx, result)
    }

    fn remove_entry(&self, p: &str, is_dir: bool) -> Result<()> {
        let tx = self.store.begin_write();
        let result = remove_entry_inner(&tx, p, is_dir);
        finish_write(tx, result)
    }
}

/// Commits on success, aborts on error. The original error surfaces even if
/// the abort itself fails; that secondary failure is only logged.
fn finish_write<T: WriteTransaction, R>(tx: T, result: Result<R>) -> Result<R> {
    match result {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = tx.abort() {
                warn!("transaction abort failed after {err}: {abort_err}");
            }
            Err(err)
        }
    }
}

/// Reads and decodes the inode stored under `id`. `p` is the path being
/// served, for error attribution.
fn get_inode<T: ReadTransaction>(tx: &T, p: &str, id: &str) -> Result<Inode> {
    let blob = tx
        .get(id)?
        .ok_or_else(|| FsError::new(Errno::ENOENT, p))?;
    Inode::from_bytes(&blob)
}

/// Reads and decodes the directory listing behind `inode`.
fn get_dir_listing<T: ReadTransaction>(tx: &T, p: &str, inode: &Inode) -> Result<DirListing> {
    if !inode.is_directory() {
        return Err(FsError::new(Errno::ENOTDIR, p));
    }
    let blob = tx
        .get(&inode.data_id)?
        .ok_or_else(|| FsError::corrupt(p))?;
    deserialize_listing(&blob)
}

/// Walks `p` down from the root, returning the node id it names.
fn resolve_node_id<T: ReadTransaction>(tx: &T, p: &str) -> Result<String> {
    let mut id = ROOT_NODE_ID.to_string();
    for component in p.split('/').filter(|c| !c.is_empty()) {
        let inode = get_inode(tx, p, &id)?;
        let listing = get_dir_listing(tx, p, &inode)?;
        id = listing
            .get(component)
            .cloned()
            .ok_or_else(|| FsError::new(Errno::ENOENT, p))?;
    }
    Ok(id)
}

/// Resolves `p` to its inode record.
fn resolve_inode<T: ReadTransaction>(tx: &T, p: &str) -> Result<Inode> {
    let id = resolve_node_id(tx, p)?;
    get_inode(tx, p, &id)
}

/// Puts `data` under a freshly allocated random id and returns the id.
fn add_new_node<T: WriteTransaction>(tx: &T, data: &[u8]) -> Result<String> {
    for _ in 0..MAX_ID_ALLOCATION_ATTEMPTS {
        let id = random_id();
        if tx.put(&id, data, false)? {
            return Ok(id);
        }
    }
    Err(FsError::store("unable to allocate a fresh node id"))
}

fn make_root_inner<T: WriteTransaction>(tx: &T) -> Result<()> {
    if tx.get(ROOT_NODE_ID)?.is_some() {
        return Ok(());
    }
    let listing = serialize_listing(&DirListing::new())?;
    let data_id = add_new_node(tx, &listing)?;
    let inode = Inode::new(data_id, ROOT_DIRECTORY_SIZE, 0o777, FileKind::Directory);
    tx.put(ROOT_NODE_ID, &inode.to_bytes()?, false)?;
    Ok(())
}

fn commit_new_file_inner<T: WriteTransaction>(
    tx: &T,
    p: &str,
    kind: FileKind,
    mode: u32,
    data: &[u8],
) -> Result<Inode> {
    let parent = path::dirname(p);
    let name = path::basename(p);

    let parent_id = resolve_node_id(tx, parent)?;
    let parent_inode = get_inode(tx, parent, &parent_id)?;
    let mut listing = get_dir_listing(tx, parent, &parent_inode)?;
    if listing.contains_key(name) {
        return Err(FsError::new(Errno::EEXIST, p));
    }

    let data_id = add_new_node(tx, data)?;
    let inode = Inode::new(data_id, data.len() as u64, mode, kind);
    let inode_id = add_new_node(tx, &inode.to_bytes()?)?;

    listing.insert(name.to_string(), inode_id);
    tx.put(&parent_inode.data_id, &serialize_listing(&listing)?, true)?;
    Ok(inode)
}

fn remove_entry_inner<T: WriteTransaction>(tx: &T, p: &str, is_dir: bool) -> Result<()> {
    let parent = path::dirname(p);
    let name = path::basename(p);

    let parent_id = resolve_node_id(tx, parent)?;
    let parent_inode = get_inode(tx, parent, &parent_id)?;
    let mut listing = get_dir_listing(tx, parent, &parent_inode)?;

    let child_id = listing
        .remove(name)
        .ok_or_else(|| FsError::new(Errno::ENOENT, p))?;
    let child_inode = get_inode(tx, p, &child_id)?;
    if !is_dir && child_inode.is_directory() {
        return Err(FsError::new(Errno::EISDIR, p));
    }
    if is_dir && !child_inode.is_directory() {
        return Err(FsError::new(Errno::ENOTDIR, p));
    }

    tx.del(&child_inode.data_id)?;
    tx.del(&child_id)?;
    tx.put(&parent_inode.data_id, &serialize_listing(&listing)?, true)?;
    Ok(())
}

fn rename_inner<T: WriteTransaction>(tx: &T, old_path: &str, new_path: &str) -> Result<()> {
    let old_parent = path::dirname(old_path);
    let old_name = path::basename(old_path);
    let new_parent = path::dirname(new_path);
    let new_name = path::basename(new_path);

    let old_parent_id = resolve_node_id(tx, old_parent)?;
    let old_parent_inode = get_inode(tx, old_parent, &old_parent_id)?;
    let mut old_listing = get_dir_listing(tx, old_parent, &old_parent_inode)?;

    // When the parents differ, the destination directory is loaded
    // separately; otherwise both names live in the one listing.
    let mut new_dir = if old_parent == new_parent {
        None
    } else {
        let id = resolve_node_id(tx, new_parent)?;
        let inode = get_inode(tx, new_parent, &id)?;
        let listing = get_dir_listing(tx, new_parent, &inode)?;
        Some((inode, listing))
    };

    let node_id = old_listing
        .remove(old_name)
        .ok_or_else(|| FsError::new(Errno::ENOENT, old_path))?;

    let target_listing = match &mut new_dir {
        Some((_, listing)) => listing,
        None => &mut old_listing,
    };
    if let Some(existing_id) = target_listing.get(new_name).cloned() {
        let existing = get_inode(tx, new_path, &existing_id)?;
        if existing.is_directory() {
            return Err(FsError::new(Errno::EPERM, new_path));
        }
        tx.del(&existing.data_id)?;
        tx.del(&existing_id)?;
    }
    target_listing.insert(new_name.to_string(), node_id);

    tx.put(
        &old_parent_inode.data_id,
        &serialize_listing(&old_listing)?,
        true,
    )?;
    if let Some((inode, listing)) = &new_dir {
        tx.put(&inode.data_id, &serialize_listing(listing)?, true)?;
    }
    Ok(())
}

fn sync_inner<T: WriteTransaction>(tx: &T, p: &str, data: &[u8], stats: &FileAttr) -> Result<()> {
    let node_id = resolve_node_id(tx, p)?;
    let mut inode = get_inode(tx, p, &node_id)?;
    let inode_changed = inode.update(stats);
    // The data blob is rewritten even for metadata-only flushes.
    tx.put(&inode.data_id, data, true)?;
    if inode_changed {
        tx.put(&node_id, &inode.to_bytes()?, true)?;
    }
    Ok(())
}
