//! Integration tests for the synchronous filesystem engine over the
//! in-memory store.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use kvfs::Errno;
use kvfs::FsError;
use kvfs::InMemoryStore;
use kvfs::KvFilesystem;
use kvfs::OpenFlags;
use kvfs::Result;
use kvfs::SimpleStore;
use kvfs::SimpleTransactionStore;

type TestFs<S> = KvFilesystem<SimpleTransactionStore<S>>;

fn new_fs() -> (InMemoryStore, TestFs<InMemoryStore>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backing = InMemoryStore::new();
    let fs = KvFilesystem::new(SimpleTransactionStore::new(backing.clone())).unwrap();
    (backing, fs)
}

fn rw() -> OpenFlags {
    OpenFlags::READ | OpenFlags::WRITE
}

/// Expected store key count: root's two blobs plus two per other live object.
fn expected_keys(live_objects: usize) -> usize {
    2 + 2 * live_objects
}

#[test]
fn fresh_filesystem_has_an_empty_root() {
    let (backing, fs) = new_fs();
    assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());

    let attr = fs.stat("/").unwrap();
    assert!(attr.is_directory());
    assert_eq!(attr.size, 4096);
    assert_eq!(attr.perm(), 0o777);

    assert_eq!(backing.len(), expected_keys(0));
}

#[test]
fn remounting_keeps_existing_contents() {
    let (backing, fs) = new_fs();
    fs.mkdir("/d", 0o755).unwrap();
    drop(fs);

    let remounted = KvFilesystem::new(SimpleTransactionStore::new(backing.clone())).unwrap();
    assert_eq!(remounted.readdir("/").unwrap(), ["d"]);
    assert_eq!(backing.len(), expected_keys(1));
}

#[test]
fn create_write_close_then_reopen() {
    let (backing, fs) = new_fs();

    let mut file = fs.create_file("/a", rw(), 0o666).unwrap();
    file.write(b"hello").unwrap();
    file.close().unwrap();

    let reopened = fs.open_file("/a", OpenFlags::READ).unwrap();
    assert_eq!(reopened.buffer(), b"hello");
    assert_eq!(reopened.stats().size, 5);
    reopened.close().unwrap();

    let attr = fs.stat("/a").unwrap();
    assert_eq!(attr.size, 5);
    assert!(!attr.is_directory());
    assert_eq!(backing.len(), expected_keys(1));
}

#[test]
fn created_files_start_empty() {
    let (_, fs) = new_fs();
    fs.create_file("/empty", rw(), 0o666).unwrap().close().unwrap();
    let file = fs.open_file("/empty", OpenFlags::READ).unwrap();
    assert_eq!(file.buffer(), b"");
    assert_eq!(fs.stat("/empty").unwrap().size, 0);
}

#[test]
fn nested_directories() {
    let (backing, fs) = new_fs();
    fs.mkdir("/d", 0o777).unwrap();
    fs.create_file("/d/f", rw(), 0o666).unwrap().close().unwrap();

    assert_eq!(fs.readdir("/d").unwrap(), ["f"]);
    assert_eq!(fs.readdir("/").unwrap(), ["d"]);
    assert_eq!(backing.len(), expected_keys(2));

    let attr = fs.stat("/d").unwrap();
    assert!(attr.is_directory());
    assert_eq!(attr.perm(), 0o777);
}

#[test]
fn create_at_existing_paths_fails() {
    let (_, fs) = new_fs();
    assert_eq!(
        fs.create_file("/", rw(), 0o666).unwrap_err().errno(),
        Errno::EEXIST
    );
    assert_eq!(fs.mkdir("/", 0o777).unwrap_err().errno(), Errno::EEXIST);

    fs.create_file("/a", rw(), 0o666).unwrap().close().unwrap();
    assert_eq!(
        fs.create_file("/a", rw(), 0o666).unwrap_err().errno(),
        Errno::EEXIST
    );
    assert_eq!(fs.mkdir("/a", 0o777).unwrap_err().errno(), Errno::EEXIST);
}

#[test]
fn resolution_errors() {
    let (_, fs) = new_fs();
    assert_eq!(fs.stat("/missing").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(
        fs.open_file("/missing", OpenFlags::READ).unwrap_err().errno(),
        Errno::ENOENT
    );

    fs.create_file("/f", rw(), 0o666).unwrap().close().unwrap();
    // A file used as an intermediate directory.
    assert_eq!(fs.stat("/f/child").unwrap_err().errno(), Errno::ENOTDIR);
    assert_eq!(fs.readdir("/f").unwrap_err().errno(), Errno::ENOTDIR);
}

#[test]
fn unlink_removes_file_and_blobs() {
    let (backing, fs) = new_fs();
    fs.create_file("/a", rw(), 0o666).unwrap().close().unwrap();
    assert_eq!(backing.len(), expected_keys(1));

    fs.unlink("/a").unwrap();
    assert_eq!(fs.stat("/a").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());
    assert_eq!(backing.len(), expected_keys(0));

    assert_eq!(fs.unlink("/a").unwrap_err().errno(), Errno::ENOENT);
}

#[test]
fn rmdir_removes_empty_directories() {
    let (backing, fs) = new_fs();
    fs.mkdir("/d", 0o777).unwrap();
    fs.rmdir("/d").unwrap();

    assert_eq!(fs.stat("/d").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());
    assert_eq!(backing.len(), expected_keys(0));
}

#[test]
fn removal_type_mismatches() {
    let (_, fs) = new_fs();
    fs.mkdir("/d", 0o777).unwrap();
    fs.create_file("/f", rw(), 0o666).unwrap().close().unwrap();

    assert_eq!(fs.unlink("/d").unwrap_err().errno(), Errno::EISDIR);
    assert_eq!(fs.rmdir("/f").unwrap_err().errno(), Errno::ENOTDIR);

    fs.create_file("/d/child", rw(), 0o666).unwrap().close().unwrap();
    assert_eq!(fs.rmdir("/d").unwrap_err().errno(), Errno::ENOTEMPTY);
}

#[test]
fn rename_into_own_subtree_is_rejected_before_any_io() {
    let (backing, fs) = new_fs();
    fs.mkdir("/d", 0o777).unwrap();
    let before = backing.dump();

    assert_eq!(
        fs.rename("/d", "/d/sub").unwrap_err().errno(),
        Errno::EBUSY
    );
    fs.mkdir("/d/inner", 0o777).unwrap();
    assert_eq!(
        fs.rename("/d", "/d/inner/deep").unwrap_err().errno(),
        Errno::EBUSY
    );

    fs.rmdir("/d/inner").unwrap();
    assert_eq!(backing.dump(), before);
}

#[test]
fn rename_is_not_fooled_by_sibling_name_prefixes() {
    let (_, fs) = new_fs();
    fs.mkdir("/ab", 0o777).unwrap();
    fs.rename("/ab", "/abc").unwrap();
    assert!(fs.stat("/abc").unwrap().is_directory());
    assert_eq!(fs.stat("/ab").unwrap_err().errno(), Errno::ENOENT);
}

#[test]
fn rename_within_a_directory() {
    let (backing, fs) = new_fs();
    let mut file = fs.create_file("/a", rw(), 0o666).unwrap();
    file.write(b"payload").unwrap();
    file.close().unwrap();

    fs.rename("/a", "/b").unwrap();
    assert_eq!(fs.stat("/a").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(fs.open_file("/b", OpenFlags::READ).unwrap().buffer(), b"payload");
    assert_eq!(fs.readdir("/").unwrap(), ["b"]);
    assert_eq!(backing.len(), expected_keys(1));
}

#[test]
fn rename_overwriting_a_file_frees_its_blobs() {
    let (backing, fs) = new_fs();
    fs.create_file("/a", rw(), 0o666).unwrap().close().unwrap();
    fs.create_file("/b", rw(), 0o666).unwrap().close().unwrap();
    assert_eq!(backing.len(), expected_keys(2));

    fs.rename("/a", "/b").unwrap();
    assert_eq!(fs.stat("/a").unwrap_err().errno(), Errno::ENOENT);
    fs.stat("/b").unwrap();
    assert_eq!(fs.readdir("/").unwrap(), ["b"]);
    assert_eq!(backing.len(), expected_keys(1));
}

#[test]
fn rename_refuses_to_overwrite_a_directory() {
    let (_, fs) = new_fs();
    fs.create_file("/f", rw(), 0o666).unwrap().close().unwrap();
    fs.mkdir("/d", 0o777).unwrap();
    assert_eq!(fs.rename("/f", "/d").unwrap_err().errno(), Errno::EPERM);
    fs.stat("/f").unwrap();
    assert!(fs.stat("/d").unwrap().is_directory());
}

#[test]
fn rename_of_a_directory_replaces_an_existing_file() {
    let (backing, fs) = new_fs();
    fs.mkdir("/d", 0o777).unwrap();
    fs.create_file("/t", rw(), 0o666).unwrap().close().unwrap();

    fs.rename("/d", "/t").unwrap();
    assert!(fs.stat("/t").unwrap().is_directory());
    assert_eq!(fs.stat("/d").unwrap_err().errno(), Errno::ENOENT);
    assert_eq!(backing.len(), expected_keys(1));
}

#[test]
fn rename_across_directories() {
    let (_, fs) = new_fs();
    fs.mkdir("/src", 0o777).unwrap();
    fs.mkdir("/dst", 0o777).unwrap();
    let mut file = fs.create_file("/src/f", rw(), 0o666).unwrap();
    file.write(b"moved").unwrap();
    file.close().unwrap();

    fs.rename("/src/f", "/dst/g").unwrap();
    assert_eq!(fs.readdir("/src").unwrap(), Vec::<String>::new());
    assert_eq!(fs.readdir("/dst").unwrap(), ["g"]);
    assert_eq!(fs.open_file("/dst/g", OpenFlags::READ).unwrap().buffer(), b"moved");
}

#[test]
fn rename_there_and_back_is_observably_identity() {
    let (_, fs) = new_fs();
    fs.mkdir("/d", 0o777).unwrap();
    let mut file = fs.create_file("/d/f", rw(), 0o666).unwrap();
    file.write(b"contents").unwrap();
    file.close().unwrap();

    fs.rename("/d/f", "/g").unwrap();
    fs.rename("/g", "/d/f").unwrap();

    assert_eq!(fs.readdir("/").unwrap(), ["d"]);
    assert_eq!(fs.readdir("/d").unwrap(), ["f"]);
    assert_eq!(
        fs.open_file("/d/f", OpenFlags::READ).unwrap().buffer(),
        b"contents"
    );
}

#[test]
fn rename_missing_source_fails() {
    let (_, fs) = new_fs();
    assert_eq!(fs.rename("/a", "/b").unwrap_err().errno(), Errno::ENOENT);
}

#[test]
fn sync_persists_data_and_stats() {
    let (_, fs) = new_fs();
    let mut file = fs.create_file("/a", rw(), 0o666).unwrap();
    file.write(b"first").unwrap();
    file.sync().unwrap();
    assert!(!file.is_dirty());
    assert_eq!(fs.stat("/a").unwrap().size, 5);

    file.write(b" second").unwrap();
    assert!(file.is_dirty());
    file.close().unwrap();
    assert_eq!(fs.stat("/a").unwrap().size, 12);
    assert_eq!(
        fs.open_file("/a", OpenFlags::READ).unwrap().buffer(),
        b"first second"
    );
}

#[test]
fn deep_paths_resolve() {
    let (backing, fs) = new_fs();
    fs.mkdir("/a", 0o777).unwrap();
    fs.mkdir("/a/b", 0o777).unwrap();
    fs.mkdir("/a/b/c", 0o777).unwrap();
    fs.create_file("/a/b/c/f", rw(), 0o666).unwrap().close().unwrap();

    assert_eq!(fs.stat("/a/b/c/f").unwrap().size, 0);
    assert_eq!(backing.len(), expected_keys(4));

    fs.unlink("/a/b/c/f").unwrap();
    fs.rmdir("/a/b/c").unwrap();
    fs.rmdir("/a/b").unwrap();
    fs.rmdir("/a").unwrap();
    assert_eq!(backing.len(), expected_keys(0));
}

#[test]
fn empty_wipes_everything_and_recreates_the_root() {
    let (backing, fs) = new_fs();
    fs.mkdir("/d", 0o777).unwrap();
    fs.create_file("/d/f", rw(), 0o666).unwrap().close().unwrap();

    fs.empty().unwrap();
    assert_eq!(fs.readdir("/").unwrap(), Vec::<String>::new());
    assert!(fs.stat("/").unwrap().is_directory());
    assert_eq!(backing.len(), expected_keys(0));
}

#[test]
fn facade_flags() {
    let (_, fs) = new_fs();
    assert_eq!(fs.name(), "in-memory");
    assert!(!fs.is_read_only());
    assert!(!fs.supports_symlinks());
    assert!(!fs.supports_props());
    assert!(fs.supports_synch());
    assert_eq!(fs.lstat("/").unwrap(), fs.stat("/").unwrap());
}

/// A simple store that fails the Nth `put` after being armed, for proving
/// that a failed operation leaves the store byte-identical.
#[derive(Clone)]
struct FailingStore {
    inner: InMemoryStore,
    puts_seen: Arc<AtomicUsize>,
    fail_at: Arc<AtomicUsize>,
}

impl FailingStore {
    fn new(inner: InMemoryStore) -> FailingStore {
        FailingStore {
            inner,
            puts_seen: Arc::new(AtomicUsize::new(0)),
            fail_at: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Arms the store to fail the `n`th subsequent put (1-based).
    fn arm(&self, n: usize) {
        self.puts_seen.store(0, Ordering::SeqCst);
        self.fail_at.store(n, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.fail_at.store(0, Ordering::SeqCst);
    }
}

impl SimpleStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> Result<bool> {
        let seen = self.puts_seen.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_at = self.fail_at.load(Ordering::SeqCst);
        if fail_at != 0 && seen == fail_at {
            return Err(FsError::store("injected put failure"));
        }
        self.inner.put(key, value, overwrite)
    }

    fn del(&self, key: &str) -> Result<()> {
        self.inner.del(key)
    }
}

#[test]
fn store_failure_during_create_rolls_everything_back() {
    // commit_new_file issues three puts: payload blob, inode blob, parent
    // listing. A failure at each must leave the store byte-identical.
    for fail_at in 1..=3 {
        let _ = env_logger::builder().is_test(true).try_init();
        let backing = InMemoryStore::new();
        let failing = FailingStore::new(backing.clone());
        let fs = KvFilesystem::new(SimpleTransactionStore::new(failing.clone())).unwrap();
        fs.create_file("/a", rw(), 0o666).unwrap().close().unwrap();
        let before = backing.dump();

        failing.arm(fail_at);
        let err = fs.create_file("/b", rw(), 0o666).unwrap_err();
        failing.disarm();

        assert_eq!(err.errno(), Errno::EIO);
        assert_eq!(backing.dump(), before, "fail_at = {fail_at}");
        assert_eq!(fs.readdir("/").unwrap(), ["a"]);
    }
}

#[test]
fn store_failure_during_rename_rolls_everything_back() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backing = InMemoryStore::new();
    let failing = FailingStore::new(backing.clone());
    let fs = KvFilesystem::new(SimpleTransactionStore::new(failing.clone())).unwrap();
    fs.mkdir("/src", 0o777).unwrap();
    fs.mkdir("/dst", 0o777).unwrap();
    fs.create_file("/src/f", rw(), 0o666).unwrap().close().unwrap();
    let before = backing.dump();

    // The cross-directory rename writes the two parent listings; fail the
    // second write.
    failing.arm(2);
    let err = fs.rename("/src/f", "/dst/g").unwrap_err();
    failing.disarm();

    assert_eq!(err.errno(), Errno::EIO);
    assert_eq!(backing.dump(), before);
    assert_eq!(fs.readdir("/src").unwrap(), ["f"]);
    assert_eq!(fs.readdir("/dst").unwrap(), Vec::<String>::new());
}
