//! External artist canonicalization
//!
//! Optional MusicBrainz lookup that maps tag-spelled artist names onto their
//! canonical form ("Abba" → "ABBA"), with a DB-backed cache so each distinct
//! name is queried at most once per library. All callers share a 1 req/s
//! limiter.

use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::model::CachedArtist;
use crate::normalize::normalize_artist;

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = concat!("mlc/", env!("CARGO_PKG_VERSION"), " (library cleaner)");
const RATE_LIMIT_MS: u64 = 1000;
/// Minimum match score the service must report for a result to be accepted
pub const MIN_ACCEPT_SCORE: u32 = 90;

/// Resolves a raw artist name to its canonical form
///
/// Implementations must be safe for concurrent calls; the pipeline shares
/// one instance across workers.
pub trait NameNormalizer: Send + Sync {
    /// Canonical name and known aliases for `name`
    ///
    /// A no-match is not an error: implementations return `Ok(None)` and the
    /// caller keeps the input spelling.
    ///
    /// # Errors
    /// Returns `Transient` for network failures worth retrying later.
    fn canonical(&self, name: &str) -> Result<Option<(String, Vec<String>, u32)>>;
}

/// Rate limiter enforcing one request per second across all callers
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    fn wait(&self) {
        let mut last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct ArtistSearchResponse {
    #[serde(default)]
    artists: Vec<ArtistHit>,
}

#[derive(Debug, Deserialize)]
struct ArtistHit {
    name: String,
    #[serde(default)]
    score: u32,
    #[serde(default)]
    aliases: Vec<ArtistAlias>,
}

#[derive(Debug, Deserialize)]
struct ArtistAlias {
    name: String,
}

/// MusicBrainz-backed [`NameNormalizer`]
pub struct MusicBrainzNormalizer {
    http_client: reqwest::blocking::Client,
    rate_limiter: RateLimiter,
}

impl MusicBrainzNormalizer {
    /// Build the client
    ///
    /// # Errors
    /// Returns `Transient` when the HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Transient(e.to_string()))?;
        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(RATE_LIMIT_MS),
        })
    }

    fn search(&self, name: &str) -> Result<ArtistSearchResponse> {
        let url = format!(
            "{MUSICBRAINZ_BASE_URL}/artist?query={}&fmt=json&limit=3",
            urlencode(name)
        );
        self.rate_limiter.wait();
        let mut response = self
            .http_client
            .get(&url)
            .send()
            .map_err(|e| AppError::Transient(e.to_string()))?;

        // The service answers 503 when the shared limit is exceeded; one
        // retry after the limiter interval.
        if response.status().as_u16() == 503 {
            log::debug!("MusicBrainz rate limited; retrying once");
            self.rate_limiter.wait();
            response = self
                .http_client
                .get(&url)
                .send()
                .map_err(|e| AppError::Transient(e.to_string()))?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transient(format!(
                "MusicBrainz returned {status}"
            )));
        }
        response
            .json()
            .map_err(|e| AppError::Metadata(format!("MusicBrainz response parse failed: {e}")))
    }
}

impl NameNormalizer for MusicBrainzNormalizer {
    fn canonical(&self, name: &str) -> Result<Option<(String, Vec<String>, u32)>> {
        let response = self.search(name)?;
        let Some(best) = response.artists.into_iter().max_by_key(|a| a.score) else {
            return Ok(None);
        };
        if best.score < MIN_ACCEPT_SCORE {
            log::debug!(
                "MusicBrainz match for '{name}' scored {} (< {MIN_ACCEPT_SCORE}); keeping input",
                best.score
            );
            return Ok(None);
        }
        let aliases = best.aliases.into_iter().map(|a| a.name).collect();
        Ok(Some((best.name, aliases, best.score)))
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Cache-through canonical lookup
///
/// Checks the store first; on a miss asks the normalizer and records the
/// answer (including no-answer, cached with score 0 so the service is not
/// re-queried for hopeless names). Returns the input unchanged on no-match,
/// low score, or lookup failure.
pub fn canonical_name(
    db: &Database,
    normalizer: Option<&dyn NameNormalizer>,
    name: &str,
) -> String {
    let Some(normalizer) = normalizer else {
        return name.to_string();
    };
    let search_key = normalize_artist(name);
    if search_key.is_empty() {
        return name.to_string();
    }

    match db.cached_artist(&search_key) {
        Ok(Some(cached)) => {
            return if cached.score >= MIN_ACCEPT_SCORE {
                cached.canonical_name
            } else {
                name.to_string()
            };
        }
        Ok(None) => {}
        Err(e) => {
            log::warn!("Artist cache read failed for '{search_key}': {e}");
            return name.to_string();
        }
    }

    match normalizer.canonical(name) {
        Ok(Some((canonical, aliases, score))) => {
            let entry = CachedArtist {
                search_key,
                canonical_name: canonical.clone(),
                aliases,
                score,
                cached_at: chrono::Utc::now().timestamp(),
                hit_count: 0,
            };
            if let Err(e) = db.upsert_cached_artist(&entry) {
                log::warn!("Artist cache write failed: {e}");
            }
            canonical
        }
        Ok(None) => {
            let entry = CachedArtist {
                search_key,
                canonical_name: name.to_string(),
                aliases: Vec::new(),
                score: 0,
                cached_at: chrono::Utc::now().timestamp(),
                hit_count: 0,
            };
            if let Err(e) = db.upsert_cached_artist(&entry) {
                log::warn!("Artist cache write failed: {e}");
            }
            name.to_string()
        }
        Err(e) => {
            log::warn!("Canonical lookup failed for '{name}': {e}");
            name.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeNormalizer {
        calls: AtomicU32,
        answer: Option<(String, Vec<String>, u32)>,
    }

    impl NameNormalizer for FakeNormalizer {
        fn canonical(&self, _name: &str) -> Result<Option<(String, Vec<String>, u32)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn no_normalizer_returns_input() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(canonical_name(&db, None, "Abba"), "Abba");
    }

    #[test]
    fn hit_is_cached_and_not_requeried() {
        let db = Database::open_in_memory().unwrap();
        let fake = FakeNormalizer {
            calls: AtomicU32::new(0),
            answer: Some(("ABBA".into(), vec!["Abba".into()], 100)),
        };
        assert_eq!(canonical_name(&db, Some(&fake), "Abba"), "ABBA");
        assert_eq!(canonical_name(&db, Some(&fake), "abba"), "ABBA");
        // Second call hit the cache (same normalized search key).
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn miss_is_negatively_cached() {
        let db = Database::open_in_memory().unwrap();
        let fake = FakeNormalizer {
            calls: AtomicU32::new(0),
            answer: None,
        };
        assert_eq!(canonical_name(&db, Some(&fake), "Garage Band 42"), "Garage Band 42");
        assert_eq!(canonical_name(&db, Some(&fake), "Garage Band 42"), "Garage Band 42");
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(40);
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn urlencode_escapes_reserved_bytes() {
        assert_eq!(urlencode("AC/DC & friends"), "AC%2FDC+%26+friends");
    }
}
