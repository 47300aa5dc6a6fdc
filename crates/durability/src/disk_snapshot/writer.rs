//! Streaming snapshot container writer
//!
//! The save pipeline is: state machine → [`CountedWriter`] (counts
//! uncompressed bytes) → [`Compressor`] → [`SnapshotWriter`] (file,
//! counts and checksums on-disk payload bytes). The header goes out
//! first so a crash mid-payload leaves a file that fails validation at
//! open time; the trailer goes out on [`SnapshotWriter::finish`]
//! together with an fsync.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use keel_core::{CompressionKind, Result, SnapshotVersion};
use tracing::debug;

use crate::format::{
    SnapshotHeader, SnapshotTrailer, SNAPSHOT_HEADER_SIZE, SNAPSHOT_TRAILER_SIZE,
};

/// Checksumming file writer for the snapshot container.
pub struct SnapshotWriter {
    file: File,
    path: PathBuf,
    hasher: crc32fast::Hasher,
    payload_written: u64,
}

/// What a finished writer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFileInfo {
    /// Path of the written container.
    pub path: PathBuf,
    /// CRC32 over the on-disk payload and the trailer size field.
    pub payload_checksum: u32,
    /// On-disk payload length (after compression).
    pub payload_size: u64,
    /// Payload length before compression.
    pub uncompressed_size: u64,
    /// Total container size on disk.
    pub file_size: u64,
}

impl SnapshotWriter {
    /// Create the container at `path` and write its header.
    pub fn create(
        path: &Path,
        version: SnapshotVersion,
        compression: CompressionKind,
    ) -> Result<Self> {
        let mut file = File::create(path)?;
        let header = SnapshotHeader::new(version, compression);
        file.write_all(&header.to_bytes())?;
        Ok(SnapshotWriter {
            file,
            path: path.to_path_buf(),
            hasher: crc32fast::Hasher::new(),
            payload_written: 0,
        })
    }

    /// Rolling checksum over the payload bytes written so far.
    pub fn payload_checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// On-disk payload bytes written so far.
    pub fn payload_size(&self) -> u64 {
        self.payload_written
    }

    /// Write the trailer, fsync, and report what was written.
    ///
    /// `uncompressed_size` is the byte count the state machine emitted
    /// before compression, as observed by the [`CountedWriter`] wrapping
    /// the compressor.
    pub fn finish(mut self, uncompressed_size: u64) -> Result<SnapshotFileInfo> {
        self.hasher.update(&uncompressed_size.to_le_bytes());
        let payload_checksum = self.hasher.clone().finalize();
        let trailer = SnapshotTrailer {
            payload_checksum,
            uncompressed_size,
        };
        self.file.write_all(&trailer.to_bytes())?;
        self.file.sync_all()?;

        let file_size =
            (SNAPSHOT_HEADER_SIZE + SNAPSHOT_TRAILER_SIZE) as u64 + self.payload_written;
        debug!(
            path = %self.path.display(),
            payload_size = self.payload_written,
            uncompressed_size,
            file_size,
            "snapshot container written"
        );
        Ok(SnapshotFileInfo {
            path: self.path,
            payload_checksum,
            payload_size: self.payload_written,
            uncompressed_size,
            file_size,
        })
    }
}

impl Write for SnapshotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.payload_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Writer adapter that counts the bytes passing through it.
pub struct CountedWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountedWriter<W> {
    /// Wrap `inner`.
    pub fn new(inner: W) -> Self {
        CountedWriter { inner, written: 0 }
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Unwrap, discarding the count.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Optional compression stage of the write pipeline.
pub enum Compressor<W: Write> {
    /// Bytes pass through unchanged.
    Plain(W),
    /// Bytes pass through a snappy frame encoder.
    Snappy(snap::write::FrameEncoder<W>),
}

impl<W: Write> Compressor<W> {
    /// Wrap `inner` according to `kind`.
    pub fn new(kind: CompressionKind, inner: W) -> Self {
        match kind {
            CompressionKind::None => Compressor::Plain(inner),
            CompressionKind::Snappy => Compressor::Snappy(snap::write::FrameEncoder::new(inner)),
        }
    }

    /// Flush any buffered frame and end the stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.flush()
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Plain(w) => w.write(buf),
            Compressor::Snappy(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Plain(w) => w.flush(),
            Compressor::Snappy(w) => w.flush(),
        }
    }
}
