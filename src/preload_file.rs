//! Buffered file handles.
//!
//! A handle holds the whole payload in memory: reads and writes touch only
//! the buffer, and nothing reaches the store until [`sync`](PreloadFile::sync)
//! or [`close`](PreloadFile::close) flushes the buffer plus updated stats
//! through the filesystem. The filesystem itself never advances timestamps;
//! the handle stamps `mtime` on write and hands the stats back at flush time.

use std::cmp::min;
use std::time::SystemTime;

use log::warn;

use crate::async_fs::AsyncKvFilesystem;
use crate::errors::Errno;
use crate::errors::FsError;
use crate::errors::Result;
use crate::inode::FileAttr;
use crate::open_flags::OpenFlags;
use crate::store::AsyncStore;
use crate::store::Store;
use crate::sync_fs::KvFilesystem;

/// State shared by the sync and async handles.
struct Buffered {
    path: String,
    flag: OpenFlags,
    stats: FileAttr,
    buffer: Vec<u8>,
    dirty: bool,
}

impl Buffered {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if !self.flag.is_readable() {
            return Err(FsError::new(Errno::EPERM, &self.path));
        }
        let offset = offset as usize;
        if offset >= self.buffer.len() {
            return Ok(0);
        }
        let n = min(buf.len(), self.buffer.len() - offset);
        buf[..n].copy_from_slice(&self.buffer[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        if !self.flag.is_writable() {
            return Err(FsError::new(Errno::EPERM, &self.path));
        }
        let offset = if self.flag.contains(OpenFlags::APPEND) {
            self.buffer.len()
        } else {
            offset as usize
        };
        let end = offset + data.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[offset..end].copy_from_slice(data);
        self.stats.size = self.buffer.len() as u64;
        self.stats.mtime = SystemTime::now();
        self.dirty = true;
        Ok(data.len())
    }

    fn warn_if_dirty(&self) {
        if self.dirty {
            warn!(
                "file handle for {:?} dropped with unflushed changes",
                self.path
            );
        }
    }
}

macro_rules! handle_accessors {
    () => {
        /// The path this handle was opened at.
        pub fn path(&self) -> &str {
            &self.inner.path
        }

        /// The flags this handle was opened with.
        pub fn flag(&self) -> OpenFlags {
            self.inner.flag
        }

        /// The handle's current view of the file's stats.
        pub fn stats(&self) -> FileAttr {
            self.inner.stats
        }

        /// The buffered contents.
        pub fn buffer(&self) -> &[u8] {
            &self.inner.buffer
        }

        /// Whether the buffer has changes the store has not seen.
        pub fn is_dirty(&self) -> bool {
            self.inner.dirty
        }

        /// Copies bytes starting at `offset` into `buf`, returning how many
        /// were copied. Fails with `EPERM` on a handle not opened for
        /// reading.
        pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
            self.inner.read_at(buf, offset)
        }

        /// Writes `data` at `offset`, growing the buffer as needed (at the
        /// end instead when opened with `APPEND`). Fails with `EPERM` on a
        /// handle not opened for writing.
        pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
            self.inner.write_at(data, offset)
        }

        /// Appends `data` at the end of the buffer.
        pub fn write(&mut self, data: &[u8]) -> Result<usize> {
            let end = self.inner.buffer.len() as u64;
            self.inner.write_at(data, end)
        }
    };
}

/// A buffered handle to a file in a synchronous [`KvFilesystem`].
pub struct PreloadFile<'fs, S: Store> {
    fs: &'fs KvFilesystem<S>,
    inner: Buffered,
}

impl<S: Store> std::fmt::Debug for PreloadFile<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadFile")
            .field("path", &self.inner.path)
            .field("dirty", &self.inner.dirty)
            .finish()
    }
}

impl<'fs, S: Store> PreloadFile<'fs, S> {
    pub(crate) fn new(
        fs: &'fs KvFilesystem<S>,
        path: &str,
        flag: OpenFlags,
        stats: FileAttr,
        buffer: Vec<u8>,
    ) -> PreloadFile<'fs, S> {
        PreloadFile {
            fs,
            inner: Buffered {
                path: path.to_string(),
                flag,
                stats,
                buffer,
                dirty: false,
            },
        }
    }

    handle_accessors!();

    /// Flushes the buffer and stats through the filesystem if dirty.
    pub fn sync(&mut self) -> Result<()> {
        if self.inner.dirty {
            self.fs
                .sync(&self.inner.path, &self.inner.buffer, &self.inner.stats)?;
            self.inner.dirty = false;
        }
        Ok(())
    }

    /// Flushes and consumes the handle.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

impl<S: Store> Drop for PreloadFile<'_, S> {
    fn drop(&mut self) {
        self.inner.warn_if_dirty();
    }
}

/// A buffered handle to a file in an [`AsyncKvFilesystem`].
pub struct AsyncPreloadFile<'fs, S: AsyncStore> {
    fs: &'fs AsyncKvFilesystem<S>,
    inner: Buffered,
}

impl<S: AsyncStore> std::fmt::Debug for AsyncPreloadFile<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPreloadFile")
            .field("path", &self.inner.path)
            .field("dirty", &self.inner.dirty)
            .finish()
    }
}

impl<'fs, S: AsyncStore> AsyncPreloadFile<'fs, S> {
    pub(crate) fn new(
        fs: &'fs AsyncKvFilesystem<S>,
        path: &str,
        flag: OpenFlags,
        stats: FileAttr,
        buffer: Vec<u8>,
    ) -> AsyncPreloadFile<'fs, S> {
        AsyncPreloadFile {
            fs,
            inner: Buffered {
                path: path.to_string(),
                flag,
                stats,
                buffer,
                dirty: false,
            },
        }
    }

    handle_accessors!();

    /// Flushes the buffer and stats through the filesystem if dirty.
    pub async fn sync(&mut self) -> Result<()> {
        if self.inner.dirty {
            self.fs
                .sync(&self.inner.path, &self.inner.buffer, &self.inner.stats)
                .await?;
            self.inner.dirty = false;
        }
        Ok(())
    }

    /// Flushes and consumes the handle.
    pub async fn close(mut self) -> Result<()> {
        self.sync().await
    }
}

impl<S: AsyncStore> Drop for AsyncPreloadFile<'_, S> {
    fn drop(&mut self) {
        self.inner.warn_if_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::FileKind;
    use crate::time::system_time_from_ms;

    fn stats() -> FileAttr {
        FileAttr {
            size: 0,
            mode: 0o666 | FileKind::File.mode_bits(),
            kind: FileKind::File,
            atime: system_time_from_ms(0),
            mtime: system_time_from_ms(0),
            ctime: system_time_from_ms(0),
        }
    }

    fn buffered(flag: OpenFlags) -> Buffered {
        Buffered {
            path: "/f".to_string(),
            flag,
            stats: stats(),
            buffer: Vec::new(),
            dirty: false,
        }
    }

    #[test]
    fn writes_grow_the_buffer_and_stats() {
        let mut file = buffered(OpenFlags::READ | OpenFlags::WRITE);
        assert_eq!(file.write_at(b"hello", 0).unwrap(), 5);
        assert_eq!(file.buffer, b"hello");
        assert_eq!(file.stats.size, 5);
        assert!(file.dirty);

        file.write_at(b"!", 5).unwrap();
        assert_eq!(file.buffer, b"hello!");
    }

    #[test]
    fn append_ignores_the_offset() {
        let mut file = buffered(OpenFlags::READ | OpenFlags::APPEND);
        file.write_at(b"ab", 0).unwrap();
        file.write_at(b"cd", 0).unwrap();
        assert_eq!(file.buffer, b"abcd");
    }

    #[test]
    fn reads_respect_bounds() {
        let mut file = buffered(OpenFlags::READ | OpenFlags::WRITE);
        file.write_at(b"hello", 0).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(file.read_at(&mut buf, 2).unwrap(), 3);
        assert_eq!(&buf, b"llo");
        assert_eq!(file.read_at(&mut buf, 10).unwrap(), 0);
    }

    #[test]
    fn flags_gate_reads_and_writes() {
        let mut read_only = buffered(OpenFlags::READ);
        assert_eq!(
            read_only.write_at(b"x", 0).unwrap_err().errno(),
            Errno::EPERM
        );

        let write_only = buffered(OpenFlags::WRITE);
        let mut buf = [0u8; 1];
        assert_eq!(
            write_only.read_at(&mut buf, 0).unwrap_err().errno(),
            Errno::EPERM
        );
    }
}
