//! Core data models for the fingerprint store.
//!
//! Row types for the two persisted relations and the records handed to
//! the upstream fingerprinter and the downstream alignment scorer.

use serde::Serialize;

// ============================================================================
// Type Aliases
// ============================================================================

/// System-generated song identifier (SQLite rowid of `songs`).
pub type SongId = i64;

/// Time-bucket index of a hash occurrence within a song.
pub type Offset = u32;

// ============================================================================
// Song Models
// ============================================================================

/// Completed song as listed by `get_songs()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Song {
    pub song_id: SongId,
    pub song_name: String,
    #[serde(serialize_with = "serialize_hex")]
    pub file_hash: Vec<u8>, // Content hash of the source audio file
}

/// Song metadata looked up by the scorer once a track wins the vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SongMetadata {
    pub song_name: String,
    #[serde(serialize_with = "serialize_hex")]
    pub file_hash: Vec<u8>,
}

// ============================================================================
// Fingerprint Models
// ============================================================================

/// Stored fingerprint row as returned by `query()`.
///
/// `(hash, song_id, offset)` is unique in the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    pub hash: String,
    pub song_id: SongId,
    pub offset: Offset,
}

/// One stored fingerprint matching a query hash.
///
/// `offset_delta` is `stored_offset - query_offset`. Songs whose matches pile
/// up on a single delta are the alignment scorer's strong candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Match {
    pub song_id: SongId,
    pub offset_delta: i64,
}

impl Match {
    pub fn new(song_id: SongId, stored_offset: Offset, query_offset: Offset) -> Self {
        Self {
            song_id,
            offset_delta: i64::from(stored_offset) - i64::from(query_offset),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Row counts reported by the administrative interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub songs: u64, // Completed (fingerprinted) songs only
    pub fingerprints: u64,
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}
