//! Streaming snapshot container reader
//!
//! The header is validated eagerly on open (size floor, magic, header
//! CRC, version, compression), so a truncated or foreign file is
//! rejected before any payload byte is served. Payload validation is
//! deferred to [`SnapshotReader::validate_payload`], which drains any
//! unread payload through the rolling checksum and compares the
//! trailer; recovery must not be trusted until that call succeeds.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use keel_core::{CompressionKind, Result, SnapshotError};

use crate::format::{
    SnapshotHeader, SnapshotTrailer, MIN_SNAPSHOT_SIZE, SNAPSHOT_HEADER_SIZE,
    SNAPSHOT_TRAILER_SIZE,
};

/// Validating reader over a snapshot container.
pub struct SnapshotReader {
    file: File,
    header: SnapshotHeader,
    payload_len: u64,
    payload_read: u64,
    hasher: crc32fast::Hasher,
}

impl SnapshotReader {
    /// Open `path` and validate its header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        if size < MIN_SNAPSHOT_SIZE {
            return Err(SnapshotError::TooShort { size });
        }

        let mut header_bytes = [0u8; SNAPSHOT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = SnapshotHeader::from_bytes(&header_bytes)?;

        Ok(SnapshotReader {
            file,
            header,
            payload_len: size - MIN_SNAPSHOT_SIZE,
            payload_read: 0,
            hasher: crc32fast::Hasher::new(),
        })
    }

    /// The validated container header.
    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    /// On-disk payload length (after compression).
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Drain any unread payload, then check the trailer checksum.
    ///
    /// Returns the uncompressed payload size recorded in the trailer.
    /// Consumes the reader; a snapshot whose payload fails here must be
    /// treated as unusable.
    pub fn validate_payload(mut self) -> Result<u64> {
        let mut scratch = [0u8; 32 * 1024];
        while self.payload_read < self.payload_len {
            let n = self.read(&mut scratch)?;
            if n == 0 {
                // The file shrank under us; surface it as truncation.
                return Err(SnapshotError::TooShort {
                    size: SNAPSHOT_HEADER_SIZE as u64 + self.payload_read,
                });
            }
        }

        let mut trailer_bytes = [0u8; SNAPSHOT_TRAILER_SIZE];
        self.file.read_exact(&mut trailer_bytes)?;
        let trailer = SnapshotTrailer::from_bytes(&trailer_bytes);

        self.hasher.update(&trailer.uncompressed_size.to_le_bytes());
        let computed = self.hasher.finalize();
        if trailer.payload_checksum != computed {
            return Err(SnapshotError::ChecksumMismatch {
                stored: trailer.payload_checksum,
                computed,
            });
        }
        Ok(trailer.uncompressed_size)
    }
}

impl Read for SnapshotReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.payload_len - self.payload_read;
        if remaining == 0 {
            return Ok(0);
        }
        let limit = buf.len().min(remaining as usize);
        let n = self.file.read(&mut buf[..limit])?;
        self.hasher.update(&buf[..n]);
        self.payload_read += n as u64;
        Ok(n)
    }
}

/// Optional decompression stage of the read pipeline.
pub enum Decompressor<R: Read> {
    /// Bytes pass through unchanged.
    Plain(R),
    /// Bytes pass through a snappy frame decoder.
    Snappy(snap::read::FrameDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    /// Wrap `inner` according to `kind`.
    pub fn new(kind: CompressionKind, inner: R) -> Self {
        match kind {
            CompressionKind::None => Decompressor::Plain(inner),
            CompressionKind::Snappy => Decompressor::Snappy(snap::read::FrameDecoder::new(inner)),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Plain(r) => r.read(buf),
            Decompressor::Snappy(r) => r.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_snapshot::writer::{Compressor, CountedWriter, SnapshotWriter};
    use keel_core::SnapshotVersion;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_container(dir: &Path, compression: CompressionKind, payload: &[u8]) -> PathBuf {
        let path = dir.join("test.gbsnap");
        let mut file_writer =
            SnapshotWriter::create(&path, SnapshotVersion::V2, compression).unwrap();
        let mut counted = CountedWriter::new(Compressor::new(compression, &mut file_writer));
        counted.write_all(payload).unwrap();
        let uncompressed = counted.bytes_written();
        counted.into_inner().finish().unwrap();
        file_writer.finish(uncompressed).unwrap();
        path
    }

    #[test]
    fn test_roundtrip_plain() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"state machine bytes without compression";
        let path = write_container(dir.path(), CompressionKind::None, payload);

        let mut reader = SnapshotReader::open(&path).unwrap();
        assert_eq!(reader.header().compression, CompressionKind::None);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);

        let uncompressed = reader.validate_payload().unwrap();
        assert_eq!(uncompressed, payload.len() as u64);
    }

    #[test]
    fn test_roundtrip_snappy() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![42u8; 64 * 1024];
        let path = write_container(dir.path(), CompressionKind::Snappy, &payload);

        let mut reader = SnapshotReader::open(&path).unwrap();
        assert_eq!(reader.header().compression, CompressionKind::Snappy);
        // Compressible payload must actually shrink on disk.
        assert!(reader.payload_len() < payload.len() as u64);

        let mut out = Vec::new();
        {
            let mut decompressor = Decompressor::new(CompressionKind::Snappy, &mut reader);
            decompressor.read_to_end(&mut out).unwrap();
        }
        assert_eq!(out, payload);
        assert_eq!(reader.validate_payload().unwrap(), payload.len() as u64);
    }

    #[test]
    fn test_validate_without_reading() {
        // validate_payload must drain the payload the caller skipped.
        let dir = tempfile::tempdir().unwrap();
        let path = write_container(dir.path(), CompressionKind::None, b"unread payload");

        let reader = SnapshotReader::open(&path).unwrap();
        assert_eq!(reader.validate_payload().unwrap(), 14);
    }

    #[test]
    fn test_too_short_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.gbsnap");
        fs::write(&path, b"KSNP").unwrap();

        assert!(matches!(
            SnapshotReader::open(&path),
            Err(SnapshotError::TooShort { size: 4 })
        ));
    }

    #[test]
    fn test_foreign_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.gbsnap");
        fs::write(&path, vec![0u8; 64]).unwrap();

        assert!(matches!(
            SnapshotReader::open(&path),
            Err(SnapshotError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_single_byte_mutations_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_container(dir.path(), CompressionKind::None, b"sensitive payload");
        let pristine = fs::read(&path).unwrap();

        // One offset inside the header, one in the payload, one in each
        // trailer field; every flip must surface as an integrity error.
        for offset in [1, 5, 13, 20, 28, 32, 40] {
            let mut corrupted = pristine.clone();
            corrupted[offset] ^= 0xFF;
            fs::write(&path, &corrupted).unwrap();

            let result = SnapshotReader::open(&path).and_then(|r| r.validate_payload());
            let err = result.expect_err(&format!("offset {offset} should fail"));
            assert!(err.is_integrity(), "offset {offset}: {err}");
        }
    }

    #[test]
    fn test_truncated_payload_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_container(dir.path(), CompressionKind::None, b"payload to truncate");
        let data = fs::read(&path).unwrap();

        // Drop the last 5 bytes: the trailer is now torn and the checksum
        // region shifted.
        fs::write(&path, &data[..data.len() - 5]).unwrap();

        let result = SnapshotReader::open(&path).and_then(|r| r.validate_payload());
        assert!(result.unwrap_err().is_integrity());
    }
}
