//! Incrementally written zip archive
//!
//! Entries are written straight into a shared in-memory buffer that the
//! orchestrator drains after every receiver, so the archive is streamed to
//! the client as it grows and only one receiver's bytes are held at a time.

use axum::body::Bytes;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use zip::write::{SimpleFileOptions, StreamWriter};
use zip::{CompressionMethod, ZipWriter};

use crate::error::FsResult;

/// Write half of the archive buffer; the archive writer keeps a clone to drain it
#[derive(Clone, Default)]
struct DrainBuffer(Arc<Mutex<Vec<u8>>>);

impl DrainBuffer {
    fn take(&self) -> io::Result<Vec<u8>> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::other("archive buffer lock poisoned"))?;
        Ok(std::mem::take(&mut *buf))
    }
}

impl Write for DrainBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("archive buffer lock poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Zip archive written for one `saczip` response
pub struct ArchiveWriter {
    zip: ZipWriter<StreamWriter<DrainBuffer>>,
    buffer: DrainBuffer,
    entries: usize,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        let buffer = DrainBuffer::default();
        Self {
            zip: ZipWriter::new_stream(buffer.clone()),
            buffer,
            entries: 0,
        }
    }

    /// Append one file; entries keep their insertion order
    pub fn append(&mut self, name: &str, data: &[u8]) -> FsResult<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        self.zip.start_file(name, options)?;
        self.zip.write_all(data)?;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries appended so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Take the bytes written since the last drain
    pub fn drain(&self) -> FsResult<Bytes> {
        Ok(Bytes::from(self.buffer.take()?))
    }

    /// Write the central directory and return the remaining bytes
    pub fn finish(self) -> FsResult<Bytes> {
        let Self { zip, buffer, .. } = self;
        zip.finish()?;
        Ok(Bytes::from(buffer.take()?))
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}
