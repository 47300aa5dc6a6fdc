//! Core vocabulary for the keel snapshot runtime
//!
//! This crate defines the types, traits, and errors shared by every
//! layer of the snapshot lifecycle:
//! - `SnapshotRecord` and friends: the persisted metadata model
//! - `LogStore` and the state machine traits: the consumed interfaces
//! - `SnapshotError`/`Result`: the unified error surface
//! - `SnapshotConfig`: retention and streaming knobs
//!
//! The filesystem machinery itself lives in `keel-durability`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{SnapshotConfig, DEFAULT_CHUNK_SIZE, RETENTION_FLOOR};
pub use error::{Result, SnapshotError};
pub use traits::{
    FileRegistry, LogStore, SessionLoader, SnapshotRecoverable, SnapshotSavable,
    SnapshotStreamable,
};
pub use types::{
    CancelToken, CompressionKind, Membership, SnapshotFile, SnapshotKind, SnapshotMeta,
    SnapshotRecord, SnapshotRequest, SnapshotRequestKind, SnapshotUpdate, SnapshotVersion,
};
