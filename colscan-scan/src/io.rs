//! Byte-range fetching with cooperative stop and read accounting.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use colscan_format::{ByteRange, ByteRangeReader, ReadOutcome, read_range};
use colscan_result::{Error, Result};

/// Reader that reports [`ReadOutcome::Stopped`] once the stop flag is set.
pub(crate) struct StoppableReader {
    inner: Arc<dyn ByteRangeReader>,
    stop: Arc<AtomicBool>,
}

impl StoppableReader {
    pub(crate) fn new(inner: Arc<dyn ByteRangeReader>, stop: Arc<AtomicBool>) -> Self {
        Self { inner, stop }
    }
}

impl ByteRangeReader for StoppableReader {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        if self.stop.load(Ordering::Relaxed) {
            return Ok(ReadOutcome::Stopped);
        }
        self.inner.read_at(offset, buf)
    }
}

/// Fetches byte ranges, splitting large ones into bounded reads.
pub(crate) struct RangeFetcher {
    reader: Arc<StoppableReader>,
    max_read_bytes: u64,
    read_calls: u64,
    read_bytes: u64,
}

impl RangeFetcher {
    pub(crate) fn new(reader: Arc<StoppableReader>, max_read_bytes: u64) -> Self {
        Self {
            reader,
            max_read_bytes: max_read_bytes.max(1),
            read_calls: 0,
            read_bytes: 0,
        }
    }

    pub(crate) fn fetch(&mut self, range: ByteRange) -> Result<Bytes> {
        if range.length <= self.max_read_bytes {
            return self.read_piece(range);
        }
        let len = usize::try_from(range.length)
            .map_err(|_| Error::corrupt(format!("byte range of {} bytes", range.length)))?;
        let mut out = BytesMut::with_capacity(len);
        let mut offset = range.offset;
        while offset < range.end() {
            let length = self.max_read_bytes.min(range.end() - offset);
            out.extend_from_slice(&self.read_piece(ByteRange::new(offset, length))?);
            offset += length;
        }
        Ok(out.freeze())
    }

    fn read_piece(&mut self, range: ByteRange) -> Result<Bytes> {
        if range.length == 0 {
            return Ok(Bytes::new());
        }
        let bytes = read_range(self.reader.as_ref(), range)?;
        self.read_calls += 1;
        self.read_bytes += bytes.len() as u64;
        Ok(bytes)
    }

    #[inline]
    pub(crate) fn read_calls(&self) -> u64 {
        self.read_calls
    }

    #[inline]
    pub(crate) fn read_bytes(&self) -> u64 {
        self.read_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colscan_format::memory::{InstrumentedReader, MemFile};

    fn fetcher(max: u64) -> (RangeFetcher, Arc<InstrumentedReader<MemFile>>, Arc<AtomicBool>) {
        let data: Vec<u8> = (0..100u8).collect();
        let inner = Arc::new(InstrumentedReader::new(MemFile::new("m", Bytes::from(data))));
        let stop = Arc::new(AtomicBool::new(false));
        let reader = Arc::new(StoppableReader::new(inner.clone(), Arc::clone(&stop)));
        (RangeFetcher::new(reader, max), inner, stop)
    }

    #[test]
    fn splits_large_ranges() {
        let (mut fetcher, inner, _) = fetcher(16);
        let bytes = fetcher.fetch(ByteRange::new(10, 40)).unwrap();
        assert_eq!(bytes.len(), 40);
        assert_eq!(bytes[0], 10);
        assert_eq!(bytes[39], 49);
        assert_eq!(fetcher.read_calls(), 3);
        assert_eq!(fetcher.read_bytes(), 40);
        assert_eq!(inner.snapshot().read_calls, 3);
    }

    #[test]
    fn stop_flag_cancels_reads() {
        let (mut fetcher, inner, stop) = fetcher(64);
        stop.store(true, Ordering::Relaxed);
        assert!(matches!(fetcher.fetch(ByteRange::new(0, 8)), Err(Error::Cancelled)));
        assert_eq!(inner.snapshot().read_calls, 0);
    }
}
