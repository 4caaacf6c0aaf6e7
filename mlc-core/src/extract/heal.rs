//! Tag auto-healing
//!
//! Fills missing tags from filename and ancestor-directory conventions and
//! strips parasitic decorations rippers append to titles. Every change is
//! reported back so the extractor can emit an `auto_heal` event per field.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::model::{TagValue, TrackMetadata};

/// One field changed by healing: `(field, old, new)`
pub type HealedField = (&'static str, String, String);

static TRACK_TITLE: Lazy<Regex> = Lazy::new(|| {
    // "04 - Title", "04. Title", "04 Title"
    Regex::new(r"^(\d{1,3})\s*[-.\s]\s*(.+)$").expect("track-title regex")
});

static ARTIST_TITLE: Lazy<Regex> = Lazy::new(|| {
    // "Artist - Title" (single separator only; deeper dashes stay in the title)
    Regex::new(r"^(.+?)\s+-\s+(.+)$").expect("artist-title regex")
});

static YEAR_ALBUM: Lazy<Regex> = Lazy::new(|| {
    // "1976 - Arrival", "(1976) Arrival"
    Regex::new(r"^\(?(\d{4})\)?\s*[-.\s]\s*(.+)$").expect("year-album regex")
});

static DECORATIONS: Lazy<Regex> = Lazy::new(|| {
    // Bracketed junk rippers append: "[320kbps]", "(Official Video)", "{HQ}"...
    Regex::new(
        r"(?i)\s*[(\[{]\s*(?:\d{2,4}\s*kbps|official(?:\s+\w+)*|hq|hd|lyrics?(?:\s+video)?|audio(?:\s+only)?|full\s+album|free\s+download|explicit|clean|www\.[^)\]}]+|youtube|video)\s*[)\]}]",
    )
    .expect("decorations regex")
});

/// Strip known bracketed decorations from a title
///
/// Returns `None` when nothing changed.
#[must_use]
pub fn clean_title(title: &str) -> Option<String> {
    let cleaned = DECORATIONS.replace_all(title, "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned == title || cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn is_empty(slot: &Option<String>) -> bool {
    slot.as_deref().is_none_or(|s| s.trim().is_empty())
}

/// Fill empty fields from filename and path conventions, clean the title,
/// and derive the compilation flag from raw tags
///
/// The two ancestor directories are read as `.../Artist Name/1976 - Album/`
/// or `.../Artist Name/Album/`. Existing non-empty tags always win.
pub fn heal(meta: &mut TrackMetadata, src_path: &Path) -> Vec<HealedField> {
    let mut changes = Vec::new();
    let stem = src_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .trim();

    // Filename hints: NN - Title / NN. Title, then Artist - Title.
    if !stem.is_empty() {
        if let Some(caps) = TRACK_TITLE.captures(stem) {
            if meta.track_no.is_none_or(|t| t == 0) {
                if let Ok(track) = caps[1].parse::<u32>() {
                    if track > 0 {
                        meta.track_no = Some(track);
                        changes.push(("track", String::new(), track.to_string()));
                    }
                }
            }
            if is_empty(&meta.title) {
                let title = caps[2].trim().to_string();
                changes.push(("title", String::new(), title.clone()));
                meta.title = Some(title);
            }
        } else if let Some(caps) = ARTIST_TITLE.captures(stem) {
            if is_empty(&meta.title) {
                let title = caps[2].trim().to_string();
                changes.push(("title", String::new(), title.clone()));
                meta.title = Some(title);
                if is_empty(&meta.artist) {
                    let artist = caps[1].trim().to_string();
                    changes.push(("artist", String::new(), artist.clone()));
                    meta.artist = Some(artist);
                }
            }
        } else if is_empty(&meta.title) {
            changes.push(("title", String::new(), stem.to_string()));
            meta.title = Some(stem.to_string());
        }
    }

    // Path hints, but only when the parent directory looks like a release
    // directory (`1976 - Arrival`): arbitrary folder names like `b` or
    // `downloads` must not masquerade as albums.
    let parent_name = src_path
        .parent()
        .and_then(Path::file_name)
        .and_then(|s| s.to_str());
    if let Some(caps) = parent_name.and_then(|album_dir| YEAR_ALBUM.captures(album_dir)) {
        if is_empty(&meta.date) {
            changes.push(("date", String::new(), caps[1].to_string()));
            meta.date = Some(caps[1].to_string());
        }
        if is_empty(&meta.album) {
            let album = caps[2].trim().to_string();
            changes.push(("album", String::new(), album.clone()));
            meta.album = Some(album);
        }
        // With a release directory confirmed, its parent names the artist.
        let artist_dir = src_path
            .parent()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .and_then(|s| s.to_str());
        if let Some(artist_dir) = artist_dir {
            if is_empty(&meta.album_artist) && !artist_dir.is_empty() {
                changes.push(("album_artist", String::new(), artist_dir.to_string()));
                meta.album_artist = Some(artist_dir.to_string());
            }
        }
    }

    // Decoration stripping runs on whatever title survived the fills.
    if let Some(title) = meta.title.clone() {
        if let Some(cleaned) = clean_title(&title) {
            changes.push(("title", title, cleaned.clone()));
            meta.title = Some(cleaned);
        }
    }

    // Compilation flag from any of the conventional raw tags.
    if !meta.compilation {
        let flagged = ["TCMP", "cpil", "COMPILATION", "compilation"]
            .iter()
            .any(|k| meta.raw_tags.get(*k).is_some_and(TagValue::is_truthy));
        if flagged {
            meta.compilation = true;
            changes.push(("compilation", "false".into(), "true".into()));
        }
    }

    changes
}
