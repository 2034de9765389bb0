//! Random-access byte sources consumed by the encrypt and decrypt pipelines.
//!
//! Both directions read through the same interface: the plaintext file during
//! encryption and the full container during decryption.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

/// A byte provider with a known total length supporting range reads.
pub trait ByteSource {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Read bytes in `[start, end)`. The range is clamped to [`ByteSource::len`],
    /// so a read past the end returns fewer bytes (possibly none) rather than failing.
    fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        let len = <[u8]>::len(self);
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(len);
        let end = usize::try_from(end).unwrap_or(usize::MAX).min(len).max(start);
        Ok(self[start..end].to_vec())
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        self.as_slice().read_range(start, end)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        (**self).read_range(start, end)
    }
}

/// A file opened for random-access reads. The length is captured at open time.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file)
    }

    pub fn from_file(file: File) -> std::io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        let start = start.min(self.len);
        let end = end.min(self.len).max(start);
        let wanted = usize::try_from(end - start)
            .map_err(|_| std::io::Error::other("read range exceeds addressable memory"))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("file source lock poisoned"))?;
        file.seek(SeekFrom::Start(start))?;

        let mut buf = Vec::with_capacity(wanted);
        (&mut *file).take(wanted as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}
