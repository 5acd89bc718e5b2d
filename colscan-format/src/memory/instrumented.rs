use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metadata::ByteRange;
use crate::reader::{ByteRangeReader, ReadOutcome};

/// Point-in-time copy of an [`InstrumentedReader`]'s counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub read_calls: u64,
    pub bytes_read: u64,
}

/// Wraps a reader and records every read.
#[derive(Debug)]
pub struct InstrumentedReader<R> {
    inner: R,
    read_calls: AtomicU64,
    bytes_read: AtomicU64,
    ranges: Mutex<Vec<ByteRange>>,
}

impl<R: ByteRangeReader> InstrumentedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            read_calls: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            read_calls: self.read_calls.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    /// Every range requested so far, in call order.
    pub fn ranges(&self) -> Vec<ByteRange> {
        self.ranges.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Whether any recorded read touched `range`.
    pub fn touched(&self, range: ByteRange) -> bool {
        self.ranges()
            .iter()
            .any(|r| r.offset < range.end() && range.offset < r.end())
    }

    pub fn reset(&self) {
        self.read_calls.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        if let Ok(mut ranges) = self.ranges.lock() {
            ranges.clear();
        }
    }
}

impl<R: ByteRangeReader> ByteRangeReader for InstrumentedReader<R> {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let outcome = self.inner.read_at(offset, buf)?;
        if let ReadOutcome::Read(n) = outcome {
            self.read_calls.fetch_add(1, Ordering::Relaxed);
            self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
            if let Ok(mut ranges) = self.ranges.lock() {
                ranges.push(ByteRange::new(offset, buf.len() as u64));
            }
        }
        Ok(outcome)
    }
}
