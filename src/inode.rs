//! The on-store data model: inode records, directory listings, node ids.
//!
//! Every filesystem object is two keyed blobs: an inode record stored under
//! the object's node id, and a payload blob stored under the `data_id`
//! recorded inside the inode. For regular files the payload is the raw file
//! contents; for directories it is a serialized mapping from child name to
//! child node id. The root inode lives under the reserved key [`ROOT_NODE_ID`];
//! every other key is a random 128-bit identifier.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::FsError;
use crate::errors::Result;
use crate::time::ms_from_system_time;
use crate::time::system_time_from_ms;
use crate::time::time_now_ms;

/// The reserved store key under which the root directory's inode lives.
pub const ROOT_NODE_ID: &str = "/";

/// Mask selecting the file-type bits of a mode.
pub const S_IFMT: u32 = 0o170_000;
/// File-type bits marking a directory.
pub const S_IFDIR: u32 = 0o040_000;
/// File-type bits marking a regular file.
pub const S_IFREG: u32 = 0o100_000;

/// A fresh random node id: a 36-character hyphenated UUID v4 string.
///
/// 122 bits of entropy make collisions vanishingly rare; allocation still
/// bounds its retries so a broken random source cannot loop forever.
pub(crate) fn random_id() -> String {
    Uuid::new_v4().to_string()
}

/// What kind of object an inode describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// A regular file; the payload is opaque bytes.
    File,
    /// A directory; the payload is a serialized [`DirListing`].
    Directory,
}

impl FileKind {
    /// The file-type bits this kind contributes to a mode.
    pub const fn mode_bits(self) -> u32 {
        match self {
            FileKind::File => S_IFREG,
            FileKind::Directory => S_IFDIR,
        }
    }

    /// Recovers the kind from a mode's file-type bits.
    pub fn from_mode(mode: u32) -> Option<FileKind> {
        match mode & S_IFMT {
            S_IFREG => Some(FileKind::File),
            S_IFDIR => Some(FileKind::Directory),
            _ => None,
        }
    }
}

/// Stats derived from an inode: what `stat` reports and what a dirty file
/// handle passes back into `sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    /// Size of the payload in bytes.
    pub size: u64,
    /// Permission bits plus embedded file-type bits.
    pub mode: u32,
    /// Kind of object.
    pub kind: FileKind,
    /// Time of last access.
    pub atime: SystemTime,
    /// Time of last modification.
    pub mtime: SystemTime,
    /// Time of last metadata change.
    pub ctime: SystemTime,
}

impl FileAttr {
    /// The permission bits of the mode.
    pub fn perm(&self) -> u32 {
        self.mode & 0o777
    }

    /// Whether the object is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// The fixed-schema metadata record for one filesystem object.
///
/// Stored as a bincode blob under the object's node id. `data_id` is the
/// only pointer distinguishing inode keys from payload keys in the store's
/// flat namespace. Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    /// Store key of the payload blob.
    pub data_id: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Permission bits with the file-type bits OR'd in.
    pub mode: u32,
    /// Last access, milliseconds since the epoch.
    pub atime_ms: u64,
    /// Last modification, milliseconds since the epoch.
    pub mtime_ms: u64,
    /// Last metadata change, milliseconds since the epoch.
    pub ctime_ms: u64,
}

impl Inode {
    /// A new inode stamped with the current wall-clock time.
    pub fn new(data_id: String, size: u64, mode: u32, kind: FileKind) -> Inode {
        let now = time_now_ms();
        Inode {
            data_id,
            size,
            mode: mode | kind.mode_bits(),
            atime_ms: now,
            mtime_ms: now,
            ctime_ms: now,
        }
    }

    /// The kind encoded in the mode's file-type bits. Unrecognized bits are
    /// treated as a regular file.
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode).unwrap_or(FileKind::File)
    }

    /// Whether this inode describes a directory.
    pub fn is_directory(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    /// Serializes the record to its on-store blob form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|err| FsError::store(format!("encoding inode: {err}")))
    }

    /// Deserializes a record from its on-store blob form.
    pub fn from_bytes(data: &[u8]) -> Result<Inode> {
        bincode::deserialize(data).map_err(|err| FsError::store(format!("decoding inode: {err}")))
    }

    /// Derived stats for this inode.
    pub fn attrs(&self) -> FileAttr {
        FileAttr {
            size: self.size,
            mode: self.mode,
            kind: self.kind(),
            atime: system_time_from_ms(self.atime_ms),
            mtime: system_time_from_ms(self.mtime_ms),
            ctime: system_time_from_ms(self.ctime_ms),
        }
    }

    /// Merges stats handed back by a file handle into the record, returning
    /// whether any field actually changed. Callers skip rewriting the inode
    /// blob when nothing did.
    pub fn update(&mut self, stats: &FileAttr) -> bool {
        let mut changed = false;

        if self.size != stats.size {
            self.size = stats.size;
            changed = true;
        }
        if self.mode != stats.mode {
            self.mode = stats.mode;
            changed = true;
        }
        let atime_ms = ms_from_system_time(stats.atime);
        if self.atime_ms != atime_ms {
            self.atime_ms = atime_ms;
            changed = true;
        }
        let mtime_ms = ms_from_system_time(stats.mtime);
        if self.mtime_ms != mtime_ms {
            self.mtime_ms = mtime_ms;
            changed = true;
        }
        let ctime_ms = ms_from_system_time(stats.ctime);
        if self.ctime_ms != ctime_ms {
            self.ctime_ms = ctime_ms;
            changed = true;
        }

        changed
    }
}

/// A directory's payload: the mapping from child name to child node id.
pub type DirListing = BTreeMap<String, String>;

/// Serializes a directory listing to its on-store blob form. The empty
/// listing serializes to a non-empty blob, so an empty directory remains
/// distinguishable from a missing payload key.
pub fn serialize_listing(listing: &DirListing) -> Result<Vec<u8>> {
    bincode::serialize(listing).map_err(|err| FsError::store(format!("encoding listing: {err}")))
}

/// Deserializes a directory listing from its on-store blob form.
pub fn deserialize_listing(data: &[u8]) -> Result<DirListing> {
    bincode::deserialize(data).map_err(|err| FsError::store(format!("decoding listing: {err}")))
}
