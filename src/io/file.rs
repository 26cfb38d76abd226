use crate::common::error::FvmError;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Random-access byte-offset I/O over a single backing file.
///
/// The only primitive permitted to extend the file is [`FileIo::append`].
/// All reads and writes happen in whole records; ordering between them is
/// the caller's responsibility.
pub struct FileIo {
    file: File,
    len: u64,
}

impl FileIo {
    /// Opens `path` for reading and writing, creating it if it does not
    /// exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FvmError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), FvmError> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Writes exactly `buf.len()` bytes starting at `offset`.
    ///
    /// `offset + buf.len()` must not exceed the current file size; grow the
    /// file with [`FileIo::append`] first. `pwrite` happily zero-extends a
    /// file past its current length, so this is checked explicitly rather
    /// than left to the OS — `append` must stay the only thing that grows
    /// the file.
    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<(), FvmError> {
        let end = offset + buf.len() as u64;
        if end > self.len {
            return Err(FvmError::OutOfRange {
                offset,
                len: buf.len() as u64,
                size: self.len,
            });
        }
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    /// Extends the file by `nbytes`, zero-filled, and returns the offset the
    /// new region starts at (the old file size).
    pub fn append(&mut self, nbytes: u64) -> Result<u64, FvmError> {
        let old_len = self.len;
        self.file.set_len(old_len + nbytes)?;
        self.len = old_len + nbytes;
        Ok(old_len)
    }

    /// Current size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.len
    }

    /// True if the file has zero length (a brand new database).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn opened() -> (FileIo, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let io = FileIo::open(tmp.path()).unwrap();
        (io, tmp)
    }

    #[test]
    fn fresh_file_is_empty() {
        let (io, _f) = opened();
        assert!(io.is_empty());
        assert_eq!(io.size(), 0);
    }

    #[test]
    fn append_then_write_and_read_round_trip() {
        let (mut io, _f) = opened();
        let old_len = io.append(16).unwrap();
        assert_eq!(old_len, 0);
        io.write(0, b"hello, binom!!!!").unwrap();
        let mut buf = [0u8; 16];
        io.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello, binom!!!!");
    }

    #[test]
    fn write_past_end_of_file_fails() {
        let (io, _f) = opened();
        let err = io.write(0, b"nope").unwrap_err();
        assert!(matches!(err, FvmError::OutOfRange { .. }));
    }

    #[test]
    fn write_straddling_end_of_file_fails() {
        let (mut io, _f) = opened();
        io.append(4).unwrap();
        let err = io.write(2, b"toolong").unwrap_err();
        assert!(matches!(err, FvmError::OutOfRange { .. }));
        assert_eq!(io.size(), 4);
    }
}
