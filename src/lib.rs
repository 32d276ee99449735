//! Fingerprint store - persistence and bulk retrieval for audio matching.
//!
//! Stores `(hash, offset)` pairs per reference song in a single SQLite file
//! and turns batches of query hashes into per-song offset deltas for the
//! alignment scorer.

pub mod config;
pub mod cursor;
pub mod error;
pub mod matching;
pub mod models;
pub mod pool;
pub mod progress;
pub mod schema;
pub mod store;

pub use config::StoreConfig;
pub use cursor::{CursorMode, ScopedCursor};
pub use error::{StoreError, StoreResult};
pub use matching::{FingerprintScan, Matches, SongScan};
pub use models::{Fingerprint, Match, Offset, Song, SongId, SongMetadata, StoreStats};
pub use pool::{ConnectionOptions, ConnectionPool, PooledConnection};
pub use store::FingerprintStore;
