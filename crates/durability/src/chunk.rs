//! Chunked streaming of snapshot payloads
//!
//! Streaming a snapshot to a peer reuses the save-side encoding
//! pipeline but swaps the file sink for a [`ChunkWriter`] over a
//! [`ChunkSink`]. The writer buffers until a chunk boundary, emits
//! fixed-size chunks tagged with the replica's Raft coordinates, and
//! marks the final (possibly short) chunk so the receiver knows when to
//! finalize. Nothing touches the local filesystem and no log-database
//! record is written on the sender side.
//!
//! On any failure the writer's `fail` path calls [`ChunkSink::stop`]
//! and discards buffered bytes; a partial chunk is never emitted, and
//! the receiver discards the transfer because no last-chunk marker ever
//! arrived.

use std::io::{self, Write};

use keel_core::{Result, SnapshotMeta};
use tracing::debug;

/// One unit of snapshot transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChunk {
    /// Owning cluster.
    pub cluster_id: u64,
    /// Sending replica.
    pub node_id: u64,
    /// Raft index of the snapshot being streamed.
    pub index: u64,
    /// Raft term of the snapshot being streamed.
    pub term: u64,
    /// Zero-based position of this chunk in the stream.
    pub chunk_id: u64,
    /// Total number of chunks; known only once the stream ends, so it
    /// is carried by the last chunk.
    pub total_chunks: Option<u64>,
    /// Marks the final chunk; the receiver finalizes on it.
    pub last_chunk: bool,
    /// CRC32 over `data`.
    pub checksum: u32,
    /// Chunk payload.
    pub data: Vec<u8>,
}

/// Transport-facing consumer of snapshot chunks.
pub trait ChunkSink {
    /// Accept one chunk. An error aborts the stream.
    fn receive(&mut self, chunk: SnapshotChunk) -> Result<()>;

    /// Tear down the transfer after a failure. The receiver treats the
    /// stream as abandoned because no last chunk was seen.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Closed,
    Failed,
}

/// Buffers a byte stream into tagged fixed-size chunks.
pub struct ChunkWriter<'a> {
    sink: &'a mut dyn ChunkSink,
    cluster_id: u64,
    node_id: u64,
    index: u64,
    term: u64,
    chunk_size: usize,
    buf: Vec<u8>,
    next_chunk_id: u64,
    state: WriterState,
}

impl<'a> ChunkWriter<'a> {
    /// Create a writer streaming `meta`'s snapshot for the given
    /// replica into `sink`.
    pub fn new(
        sink: &'a mut dyn ChunkSink,
        cluster_id: u64,
        node_id: u64,
        meta: &SnapshotMeta,
        chunk_size: usize,
    ) -> Self {
        ChunkWriter {
            sink,
            cluster_id,
            node_id,
            index: meta.index,
            term: meta.term,
            chunk_size,
            buf: Vec::with_capacity(chunk_size),
            next_chunk_id: 0,
            state: WriterState::Open,
        }
    }

    fn emit(&mut self, data: Vec<u8>, last_chunk: bool) -> Result<()> {
        let chunk = SnapshotChunk {
            cluster_id: self.cluster_id,
            node_id: self.node_id,
            index: self.index,
            term: self.term,
            chunk_id: self.next_chunk_id,
            total_chunks: last_chunk.then(|| self.next_chunk_id + 1),
            last_chunk,
            checksum: crc32fast::hash(&data),
            data,
        };
        self.next_chunk_id += 1;
        self.sink.receive(chunk)
    }

    /// Emit the trailing chunk with the last-chunk marker and the total
    /// count. Every successful stream ends with exactly one such chunk,
    /// even when no payload bytes remain.
    pub fn close(mut self) -> Result<()> {
        assert_eq!(
            self.state,
            WriterState::Open,
            "chunk writer closed twice or after failure"
        );
        let remainder = std::mem::take(&mut self.buf);
        self.emit(remainder, true)?;
        self.state = WriterState::Closed;
        debug!(
            index = self.index,
            chunks = self.next_chunk_id,
            "snapshot stream completed"
        );
        Ok(())
    }

    /// Abort the stream: discard buffered bytes and stop the sink.
    /// Mandatory on every error path.
    pub fn fail(&mut self) {
        if self.state == WriterState::Open {
            self.buf.clear();
            self.sink.stop();
            self.state = WriterState::Failed;
        }
    }

    /// Chunks emitted so far.
    pub fn chunks_emitted(&self) -> u64 {
        self.next_chunk_id
    }
}

impl Write for ChunkWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != WriterState::Open {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "chunk writer is no longer open",
            ));
        }
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let rest = self.buf.split_off(self.chunk_size);
            let full = std::mem::replace(&mut self.buf, rest);
            if let Err(e) = self.emit(full, false) {
                self.fail();
                return Err(io::Error::other(e));
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Chunks are cut on size boundaries only; buffered bytes wait
        // for more data or for close().
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        chunks: Vec<SnapshotChunk>,
        stopped: bool,
        fail_at: Option<u64>,
    }

    impl ChunkSink for CollectingSink {
        fn receive(&mut self, chunk: SnapshotChunk) -> Result<()> {
            if self.fail_at == Some(chunk.chunk_id) {
                return Err(SnapshotError::Stopped);
            }
            self.chunks.push(chunk);
            Ok(())
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    fn meta(index: u64, term: u64) -> SnapshotMeta {
        SnapshotMeta {
            index,
            term,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_short_stream() {
        let mut sink = CollectingSink::default();
        let mut writer = ChunkWriter::new(&mut sink, 1, 2, &meta(100, 3), 1024);
        writer.write_all(b"tiny").unwrap();
        writer.close().unwrap();

        assert_eq!(sink.chunks.len(), 1);
        let chunk = &sink.chunks[0];
        assert_eq!(chunk.cluster_id, 1);
        assert_eq!(chunk.node_id, 2);
        assert_eq!(chunk.index, 100);
        assert_eq!(chunk.term, 3);
        assert_eq!(chunk.chunk_id, 0);
        assert!(chunk.last_chunk);
        assert_eq!(chunk.total_chunks, Some(1));
        assert_eq!(chunk.data, b"tiny");
        assert_eq!(chunk.checksum, crc32fast::hash(b"tiny"));
        assert!(!sink.stopped);
    }

    #[test]
    fn test_chunk_boundaries() {
        let mut sink = CollectingSink::default();
        let mut writer = ChunkWriter::new(&mut sink, 1, 2, &meta(100, 3), 8);
        // 20 bytes at size 8: two full chunks plus a 4-byte tail.
        writer.write_all(&[0xAB; 20]).unwrap();
        writer.close().unwrap();

        assert_eq!(sink.chunks.len(), 3);
        assert_eq!(sink.chunks[0].data.len(), 8);
        assert_eq!(sink.chunks[1].data.len(), 8);
        assert_eq!(sink.chunks[2].data.len(), 4);
        assert!(!sink.chunks[0].last_chunk);
        assert_eq!(sink.chunks[0].total_chunks, None);
        assert!(sink.chunks[2].last_chunk);
        assert_eq!(sink.chunks[2].total_chunks, Some(3));
        assert_eq!(
            sink.chunks.iter().map(|c| c.chunk_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_exact_multiple_still_sends_last_marker() {
        let mut sink = CollectingSink::default();
        let mut writer = ChunkWriter::new(&mut sink, 1, 2, &meta(100, 3), 8);
        writer.write_all(&[1u8; 16]).unwrap();
        writer.close().unwrap();

        // Two full chunks plus an empty terminator carrying the marker.
        assert_eq!(sink.chunks.len(), 3);
        assert!(sink.chunks[2].data.is_empty());
        assert!(sink.chunks[2].last_chunk);
        assert_eq!(sink.chunks[2].total_chunks, Some(3));
    }

    #[test]
    fn test_fail_discards_partial_and_stops_sink() {
        let mut sink = CollectingSink::default();
        let mut writer = ChunkWriter::new(&mut sink, 1, 2, &meta(100, 3), 8);
        writer.write_all(&[2u8; 11]).unwrap();
        writer.fail();

        // A failed writer rejects further writes.
        assert!(writer.write(b"more").is_err());
        drop(writer);

        assert!(sink.stopped);
        // The full chunk went out, the 3 buffered bytes did not.
        assert_eq!(sink.chunks.len(), 1);
        assert!(!sink.chunks[0].last_chunk);
    }

    #[test]
    fn test_sink_error_stops_stream() {
        let mut sink = CollectingSink {
            fail_at: Some(1),
            ..Default::default()
        };
        let mut writer = ChunkWriter::new(&mut sink, 1, 2, &meta(100, 3), 8);
        let err = writer.write_all(&[3u8; 24]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(sink.stopped);
        assert_eq!(sink.chunks.len(), 1);
    }
}
