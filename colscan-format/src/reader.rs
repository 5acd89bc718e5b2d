//! Byte-range access to a file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use colscan_result::{Error, Result};

use crate::metadata::ByteRange;

/// Outcome of a single positioned read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written to the front of the buffer. `0` means end of file.
    Read(usize),
    /// A cooperative stop was observed; the buffer contents are unspecified.
    Stopped,
}

/// Positioned reads over one file.
///
/// Implementations may return fewer bytes than requested; [`read_range`]
/// loops until the range is filled.
pub trait ByteRangeReader: Send + Sync {
    /// Path used in error messages.
    fn path(&self) -> &str;

    /// Total file size in bytes.
    fn size(&self) -> io::Result<u64>;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome>;
}

impl<T> ByteRangeReader for Arc<T>
where
    T: ByteRangeReader + ?Sized,
{
    fn path(&self) -> &str {
        (**self).path()
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        (**self).read_at(offset, buf)
    }
}

impl<T> ByteRangeReader for &T
where
    T: ByteRangeReader + ?Sized,
{
    fn path(&self) -> &str {
        (**self).path()
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        (**self).read_at(offset, buf)
    }
}

/// Read exactly `range` from `reader`.
///
/// A stop surfaces as [`Error::Cancelled`]; I/O errors carry the reader's
/// path; a short file is [`Error::CorruptData`].
pub fn read_range(reader: &dyn ByteRangeReader, range: ByteRange) -> Result<Bytes> {
    let mut buf = vec![0u8; range.length as usize];
    let mut filled = 0usize;
    while filled < buf.len() {
        let offset = range.offset + filled as u64;
        match reader
            .read_at(offset, &mut buf[filled..])
            .map_err(|e| Error::file_read(reader.path(), e))?
        {
            ReadOutcome::Stopped => return Err(Error::Cancelled),
            ReadOutcome::Read(0) => {
                return Err(Error::corrupt(format!(
                    "unexpected end of '{}' at offset {offset} reading {} bytes at {}",
                    reader.path(),
                    range.length,
                    range.offset
                )));
            }
            ReadOutcome::Read(n) => filled += n,
        }
    }
    Ok(Bytes::from(buf))
}

/// [`ByteRangeReader`] over a local file.
#[derive(Debug)]
pub struct LocalFileReader {
    path: String,
    file: Mutex<File>,
    size: u64,
}

impl LocalFileReader {
    /// Open `path`. A missing file is [`Error::NotFound`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let file = File::open(path.as_ref()).map_err(|e| Error::file_read(&display, e))?;
        let size = file
            .metadata()
            .map_err(|e| Error::file_read(&display, e))?
            .len();
        Ok(Self {
            path: display,
            file: Mutex::new(file),
            size,
        })
    }
}

impl ByteRangeReader for LocalFileReader {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file handle lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(ReadOutcome::Read(file.read(buf)?))
    }
}
