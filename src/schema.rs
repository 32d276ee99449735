//! Table definitions and the statements run against them.

// ============================================================================
// Tables
// ============================================================================

pub const SONGS_TABLE: &str = "songs";
pub const FINGERPRINTS_TABLE: &str = "fingerprints";

pub const CREATE_SONGS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS songs (
        song_id INTEGER PRIMARY KEY AUTOINCREMENT,
        song_name TEXT NOT NULL,
        fingerprinted INTEGER NOT NULL DEFAULT 0,
        file_hash BLOB NOT NULL
    )";

// UNIQUE(hash, ...) doubles as the index on `hash` used by the match path.
pub const CREATE_FINGERPRINTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS fingerprints (
        hash TEXT NOT NULL,
        song_id INTEGER NOT NULL,
        \"offset\" INTEGER NOT NULL CHECK (\"offset\" >= 0),
        UNIQUE (hash, song_id, \"offset\"),
        FOREIGN KEY (song_id) REFERENCES songs(song_id) ON DELETE CASCADE
    )";

// Fingerprints first: dropping songs first would cascade row by row.
pub const DROP_FINGERPRINTS: &str = "DROP TABLE IF EXISTS fingerprints";
pub const DROP_SONGS: &str = "DROP TABLE IF EXISTS songs";

// ============================================================================
// Writes
// ============================================================================

/// Duplicate `(hash, song_id, offset)` triples are ignored. Foreign-key
/// failures are not covered by OR IGNORE and still raise.
pub const INSERT_FINGERPRINT: &str =
    "INSERT OR IGNORE INTO fingerprints (hash, song_id, \"offset\") VALUES (?1, ?2, ?3)";

pub const INSERT_SONG: &str = "INSERT INTO songs (song_name, file_hash) VALUES (?1, ?2)";

pub const UPDATE_SONG_FINGERPRINTED: &str =
    "UPDATE songs SET fingerprinted = 1 WHERE song_id = ?1";

pub const DELETE_UNFINGERPRINTED: &str = "DELETE FROM songs WHERE fingerprinted = 0";

pub const DELETE_SONG: &str = "DELETE FROM songs WHERE song_id = ?1";

// ============================================================================
// Reads
// ============================================================================

pub const SELECT_SONG: &str = "SELECT song_name, file_hash FROM songs WHERE song_id = ?1";

pub const SELECT_NUM_SONGS: &str = "SELECT COUNT(*) FROM songs WHERE fingerprinted = 1";

pub const SELECT_NUM_FINGERPRINTS: &str = "SELECT COUNT(*) FROM fingerprints";

/// Keyset page of completed songs after `?1`, at most `?2` rows.
pub const SELECT_SONGS_PAGE: &str = "
    SELECT song_id, song_name, file_hash FROM songs
    WHERE fingerprinted = 1 AND song_id > ?1
    ORDER BY song_id
    LIMIT ?2";

/// Keyset page of every fingerprint after rowid `?1`, at most `?2` rows.
/// The rowid comes last so rows decode the same as the by-hash page.
pub const SELECT_FINGERPRINTS_PAGE: &str = "
    SELECT hash, song_id, \"offset\", rowid FROM fingerprints
    WHERE rowid > ?1
    ORDER BY rowid
    LIMIT ?2";

/// Keyset page of the fingerprints for hash `?1` after `(song_id, offset)`
/// `(?2, ?3)`, at most `?4` rows. Walks the unique index in order, so no
/// page is sorted.
pub const SELECT_FINGERPRINTS_BY_HASH_PAGE: &str = "
    SELECT hash, song_id, \"offset\" FROM fingerprints
    WHERE hash = ?1 AND (song_id, \"offset\") > (?2, ?3)
    ORDER BY song_id, \"offset\"
    LIMIT ?4";

/// Builds the match statement for one batch, with exactly `batch_len`
/// placeholders.
pub fn select_matches_sql(batch_len: usize) -> String {
    let placeholders = vec!["?"; batch_len].join(",");
    format!(
        "SELECT hash, song_id, \"offset\" FROM fingerprints WHERE hash IN ({})",
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_sql_has_one_placeholder_per_hash() {
        let sql = select_matches_sql(3);
        assert!(sql.ends_with("IN (?,?,?)"));
        assert_eq!(select_matches_sql(1000).matches('?').count(), 1000);
    }
}
