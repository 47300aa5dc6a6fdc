//! Snapshot corruption utilities
//!
//! Simulate storage degradation to test that validation refuses
//! damaged artifacts: bit rot (byte flips) and crash-torn tails
//! (truncation).

use std::fs;
use std::io;
use std::path::Path;

/// Flip every bit of the byte at `offset`.
pub fn flip_byte(path: &Path, offset: usize) -> io::Result<()> {
    let mut data = fs::read(path)?;
    assert!(offset < data.len(), "offset {offset} outside file");
    data[offset] ^= 0xFF;
    fs::write(path, &data)
}

/// Remove the last `bytes` bytes, simulating a torn write.
pub fn truncate_tail(path: &Path, bytes: usize) -> io::Result<()> {
    let data = fs::read(path)?;
    assert!(bytes <= data.len(), "cannot truncate {bytes} of {}", data.len());
    fs::write(path, &data[..data.len() - bytes])
}
