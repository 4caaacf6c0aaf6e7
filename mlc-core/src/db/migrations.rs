//! Schema migrations for the state store
//!
//! Versioned, idempotent, applied inside one transaction per migration.
//! Every statement uses `IF NOT EXISTS` so a replayed migration is harmless.

use rusqlite::Connection;

use super::error::{DatabaseError, DbResult};

/// A single schema migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number, strictly increasing
    pub version: u32,
    /// SQL to apply
    pub up_sql: &'static str,
    /// What this migration does
    pub description: &'static str,
}

fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "files and metadata tables",
            up_sql: "
                CREATE TABLE IF NOT EXISTS files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    file_key TEXT NOT NULL UNIQUE,
                    src_path TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    mtime_unix INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'discovered',
                    error TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);
                CREATE TABLE IF NOT EXISTS metadata (
                    file_id INTEGER PRIMARY KEY REFERENCES files(id),
                    container TEXT,
                    codec TEXT,
                    bitrate_kbps INTEGER,
                    sample_rate_hz INTEGER,
                    bit_depth INTEGER,
                    channels INTEGER,
                    lossless INTEGER NOT NULL DEFAULT 0,
                    duration_ms INTEGER,
                    artist TEXT,
                    album TEXT,
                    album_artist TEXT,
                    title TEXT,
                    track_no INTEGER,
                    track_total INTEGER,
                    disc_no INTEGER,
                    disc_total INTEGER,
                    date TEXT,
                    compilation INTEGER NOT NULL DEFAULT 0,
                    format TEXT,
                    raw_tags_json TEXT
                );",
        },
        Migration {
            version: 2,
            description: "clusters, members and clustering checkpoint",
            up_sql: "
                CREATE TABLE IF NOT EXISTS clusters (
                    cluster_key TEXT PRIMARY KEY,
                    hint TEXT
                );
                CREATE TABLE IF NOT EXISTS cluster_members (
                    cluster_key TEXT NOT NULL REFERENCES clusters(cluster_key),
                    file_id INTEGER NOT NULL REFERENCES files(id),
                    quality_score REAL NOT NULL DEFAULT 0,
                    preferred INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (cluster_key, file_id)
                );
                CREATE INDEX IF NOT EXISTS idx_members_file ON cluster_members(file_id);
                CREATE TABLE IF NOT EXISTS clustering_progress (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    last_processed_file_id INTEGER NOT NULL,
                    files_processed INTEGER NOT NULL,
                    total_files INTEGER NOT NULL,
                    clusters_so_far INTEGER NOT NULL
                );",
        },
        Migration {
            version: 3,
            description: "plans and executions",
            up_sql: "
                CREATE TABLE IF NOT EXISTS plans (
                    file_id INTEGER PRIMARY KEY REFERENCES files(id),
                    dest_path TEXT NOT NULL DEFAULT '',
                    action TEXT NOT NULL,
                    reason TEXT NOT NULL DEFAULT ''
                );
                CREATE INDEX IF NOT EXISTS idx_plans_action ON plans(action);
                CREATE TABLE IF NOT EXISTS executions (
                    file_id INTEGER PRIMARY KEY REFERENCES files(id),
                    ok INTEGER NOT NULL,
                    bytes_written INTEGER NOT NULL DEFAULT 0,
                    verify_hash TEXT,
                    error TEXT,
                    duration_ms INTEGER NOT NULL DEFAULT 0
                );",
        },
        Migration {
            version: 4,
            description: "artist normalization cache",
            up_sql: "
                CREATE TABLE IF NOT EXISTS artist_normalization_cache (
                    search_key TEXT PRIMARY KEY,
                    canonical_name TEXT NOT NULL,
                    aliases_json TEXT NOT NULL DEFAULT '[]',
                    score INTEGER NOT NULL,
                    cached_at INTEGER NOT NULL,
                    hit_count INTEGER NOT NULL DEFAULT 0
                );",
        },
    ]
}

fn setup_migrations_table(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok(())
}

/// Current schema version (0 when untouched)
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);
    u32::try_from(version.max(0)).map_err(|_| DatabaseError::MigrationFailed {
        version: 0,
        message: format!("version value {version} out of range"),
    })
}

/// Apply every pending migration
///
/// # Errors
/// Returns `MigrationFailed` naming the version that rolled back.
pub fn run_migrations(conn: &mut Connection) -> DbResult<()> {
    setup_migrations_table(conn)?;
    let current = current_version(conn)?;

    let mut pending: Vec<Migration> = migrations()
        .into_iter()
        .filter(|m| m.version > current)
        .collect();
    pending.sort_by_key(|m| m.version);

    for migration in pending {
        log::debug!(
            "Applying migration {}: {}",
            migration.version,
            migration.description
        );
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::MigrationFailed {
                version: migration.version,
                message: e.to_string(),
            })?;
        tx.execute_batch(migration.up_sql)
            .and_then(|()| {
                tx.execute(
                    "INSERT INTO migrations (version, description) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, migration.description],
                )
                .map(|_| ())
            })
            .map_err(|e| DatabaseError::MigrationFailed {
                version: migration.version,
                message: e.to_string(),
            })?;
        tx.commit().map_err(|e| DatabaseError::MigrationFailed {
            version: migration.version,
            message: e.to_string(),
        })?;
    }
    Ok(())
}
