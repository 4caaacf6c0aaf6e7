//! Metadata row operations

use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;

use super::error::{DatabaseError, DbResult};
use super::Database;
use crate::model::{FileStatus, TagValue, TrackMetadata};

fn map_metadata_row(row: &Row<'_>) -> rusqlite::Result<TrackMetadata> {
    let raw_json: Option<String> = row.get(20)?;
    let raw_tags: BTreeMap<String, TagValue> = raw_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    Ok(TrackMetadata {
        container: row.get(0)?,
        codec: row.get(1)?,
        bitrate_kbps: row.get(2)?,
        sample_rate_hz: row.get(3)?,
        bit_depth: row.get(4)?,
        channels: row.get(5)?,
        lossless: row.get(6)?,
        duration_ms: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
        artist: row.get(8)?,
        album: row.get(9)?,
        album_artist: row.get(10)?,
        title: row.get(11)?,
        track_no: row.get(12)?,
        track_total: row.get(13)?,
        disc_no: row.get(14)?,
        disc_total: row.get(15)?,
        date: row.get(16)?,
        compilation: row.get(17)?,
        format: row.get(18)?,
        raw_tags,
    })
}

const META_COLUMNS: &str = "container, codec, bitrate_kbps, sample_rate_hz, bit_depth, channels, \
     lossless, duration_ms, artist, album, album_artist, title, track_no, track_total, \
     disc_no, disc_total, date, compilation, format, file_id, raw_tags_json";

impl Database {
    /// Insert a batch of metadata rows and flip their files to `meta_ok`
    ///
    /// Re-extraction replaces the previous row (`INSERT OR REPLACE`), which
    /// keeps `rescan` idempotent. One transaction per batch.
    ///
    /// # Errors
    /// Returns `BatchFailed` when the transaction rolls back.
    pub fn insert_metadata_batch(&self, rows: &[(i64, TrackMetadata)]) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.in_transaction(|tx| {
            let mut insert = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO metadata (
                        file_id, container, codec, bitrate_kbps, sample_rate_hz, bit_depth,
                        channels, lossless, duration_ms, artist, album, album_artist, title,
                        track_no, track_total, disc_no, disc_total, date, compilation, format,
                        raw_tags_json
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                              ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                )
                .map_err(DatabaseError::from)?;
            let mut status = tx
                .prepare_cached("UPDATE files SET status = ?2, error = NULL WHERE id = ?1")
                .map_err(DatabaseError::from)?;
            for (file_id, meta) in rows {
                insert
                    .execute(params![
                        file_id,
                        meta.container,
                        meta.codec,
                        meta.bitrate_kbps,
                        meta.sample_rate_hz,
                        meta.bit_depth,
                        meta.channels,
                        meta.lossless,
                        meta.duration_ms.map(|v| v as i64),
                        meta.artist,
                        meta.album,
                        meta.album_artist,
                        meta.title,
                        meta.track_no,
                        meta.track_total,
                        meta.disc_no,
                        meta.disc_total,
                        meta.date,
                        meta.compilation,
                        meta.format,
                        meta.raw_tags_json(),
                    ])
                    .map_err(|e| DatabaseError::BatchFailed {
                        table: "metadata",
                        rows: rows.len(),
                        message: e.to_string(),
                    })?;
                status
                    .execute(params![file_id, FileStatus::MetaOk.as_str()])
                    .map_err(|e| DatabaseError::BatchFailed {
                        table: "metadata",
                        rows: rows.len(),
                        message: e.to_string(),
                    })?;
            }
            Ok(())
        })
    }

    /// Distinct non-empty artist names across the library
    ///
    /// Used to warm the canonicalization cache before clustering.
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn distinct_artists(&self) -> DbResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT artist FROM metadata
             WHERE artist IS NOT NULL AND artist != '' ORDER BY artist",
        )?;
        let artists = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(artists)
    }

    /// Metadata for one file
    ///
    /// # Errors
    /// Propagates query failures.
    pub fn get_metadata(&self, file_id: i64) -> DbResult<Option<TrackMetadata>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {META_COLUMNS} FROM metadata WHERE file_id = ?1"
        ))?;
        let meta = stmt.query_row([file_id], map_metadata_row).optional()?;
        Ok(meta)
    }
}
