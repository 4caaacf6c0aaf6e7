//! Artist canonicalization cache operations
//!
//! Filled lazily by the normalizer when the external service is enabled.
//! Hits bump a counter so `doctor` can report cache effectiveness.

use rusqlite::{params, OptionalExtension};

use super::error::DbResult;
use super::Database;
use crate::model::CachedArtist;

impl Database {
    /// Cached canonicalization for a normalized search key, bumping hit count
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn cached_artist(&self, search_key: &str) -> DbResult<Option<CachedArtist>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT search_key, canonical_name, aliases_json, score, cached_at, hit_count
                 FROM artist_normalization_cache WHERE search_key = ?1",
                [search_key],
                |row| {
                    let aliases_json: String = row.get(2)?;
                    Ok(CachedArtist {
                        search_key: row.get(0)?,
                        canonical_name: row.get(1)?,
                        aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
                        score: row.get::<_, i64>(3)?.max(0) as u32,
                        cached_at: row.get(4)?,
                        hit_count: row.get::<_, i64>(5)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        if row.is_some() {
            conn.execute(
                "UPDATE artist_normalization_cache SET hit_count = hit_count + 1
                 WHERE search_key = ?1",
                [search_key],
            )?;
        }
        Ok(row)
    }

    /// Insert or replace a canonicalization result
    ///
    /// # Errors
    /// Propagates the upsert failure.
    pub fn upsert_cached_artist(&self, artist: &CachedArtist) -> DbResult<()> {
        let conn = self.conn()?;
        let aliases_json = serde_json::to_string(&artist.aliases).unwrap_or_else(|_| "[]".into());
        conn.execute(
            "INSERT OR REPLACE INTO artist_normalization_cache
                 (search_key, canonical_name, aliases_json, score, cached_at, hit_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artist.search_key,
                artist.canonical_name,
                aliases_json,
                artist.score,
                artist.cached_at,
                artist.hit_count as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trips_and_counts_hits() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.cached_artist("abba").unwrap().is_none());

        db.upsert_cached_artist(&CachedArtist {
            search_key: "abba".into(),
            canonical_name: "ABBA".into(),
            aliases: vec!["Abba".into()],
            score: 100,
            cached_at: 1_700_000_000,
            hit_count: 0,
        })
        .unwrap();

        let first = db.cached_artist("abba").unwrap().unwrap();
        assert_eq!(first.canonical_name, "ABBA");
        assert_eq!(first.aliases, vec!["Abba".to_string()]);
        assert_eq!(first.hit_count, 0);

        let second = db.cached_artist("abba").unwrap().unwrap();
        assert_eq!(second.hit_count, 1);
    }
}
