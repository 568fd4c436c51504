use bitflags::bitflags;

bitflags! {
    /// How a file handle was opened.
    ///
    /// The mutation engine does not interpret these; they are carried on the
    /// handle and enforced by [`PreloadFile`](crate::PreloadFile) when the
    /// caller reads or writes through it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Reads through the handle are allowed.
        const READ = 1 << 0;
        /// Writes through the handle are allowed.
        const WRITE = 1 << 1;
        /// Writes land at the end of the buffer.
        const APPEND = 1 << 2;
        /// Create the file if it does not exist.
        const CREATE = 1 << 3;
        /// Discard existing contents on open.
        const TRUNCATE = 1 << 4;
        /// With `CREATE`, fail if the path already exists.
        const EXCLUSIVE = 1 << 5;
    }
}

impl OpenFlags {
    /// Whether data may be read through a handle opened with these flags.
    pub fn is_readable(self) -> bool {
        self.contains(OpenFlags::READ)
    }

    /// Whether data may be written through a handle opened with these flags.
    pub fn is_writable(self) -> bool {
        self.intersects(OpenFlags::WRITE | OpenFlags::APPEND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readability_and_writability() {
        assert!(OpenFlags::READ.is_readable());
        assert!(!OpenFlags::READ.is_writable());
        assert!((OpenFlags::READ | OpenFlags::WRITE).is_writable());
        assert!(OpenFlags::APPEND.is_writable());
        assert!(!(OpenFlags::CREATE | OpenFlags::TRUNCATE).is_readable());
    }
}
