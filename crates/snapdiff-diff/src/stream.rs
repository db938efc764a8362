//! Diff stream output and input.
//!
//! A diff stream is a bare sequence of fixed-size records (see
//! [`snapdiff_types::record`]). Writers append records synchronously;
//! readers stop cleanly only at a record boundary.

use std::io::{self, Read, Write};

use snapdiff_types::{DiffRecord, RECORD_SIZE};

use crate::error::{DiffError, DiffResult};

/// Destination for diff records.
///
/// Implemented for every [`Write`]: each record is written whole with
/// `write_all`, with no buffering of its own.
pub trait DiffSink {
    fn write_record(&mut self, record: &DiffRecord) -> io::Result<()>;
}

impl<W: Write + ?Sized> DiffSink for W {
    fn write_record(&mut self, record: &DiffRecord) -> io::Result<()> {
        self.write_all(&record.encode())
    }
}

/// Reads records back out of a diff stream.
pub struct RecordReader<R> {
    inner: R,
    offset: u64,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at end of stream on a record boundary. End of
    /// stream inside a record is [`DiffError::TruncatedRecord`].
    pub fn read_record(&mut self) -> DiffResult<Option<DiffRecord>> {
        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_SIZE {
            return Err(DiffError::TruncatedRecord {
                offset: self.offset,
                got: filled,
            });
        }

        let record = DiffRecord::decode(&buf).map_err(|source| DiffError::MalformedRecord {
            offset: self.offset,
            source,
        })?;
        self.offset += RECORD_SIZE as u64;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = DiffResult<DiffRecord>;

    /// Yields records until end of stream. Stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a complete in-memory stream.
pub fn decode_stream(bytes: &[u8]) -> DiffResult<Vec<DiffRecord>> {
    RecordReader::new(bytes).collect()
}
