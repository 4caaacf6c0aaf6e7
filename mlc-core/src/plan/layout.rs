//! Destination layout rendering
//!
//! Renders a `{placeholder}` template against a file's metadata into a
//! destination-relative path. A placeholder may carry a trailing decoration
//! (`{date - }`, `{disc/}`) emitted only when the value is present, so
//! missing tags collapse cleanly instead of leaving separator litter.
//! Every rendered path segment is sanitized for cross-filesystem safety.

use std::path::{Path, PathBuf};

use crate::model::{FileRow, TrackMetadata};

/// Longest byte length of one path segment
const MAX_SEGMENT_BYTES: usize = 255;

/// Characters filesystems commonly reserve
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Sanitize one path segment
///
/// Reserved characters and controls are dropped, whitespace runs collapse to
/// one space, leading/trailing dots and spaces are trimmed, and the result
/// is truncated to 255 bytes on a char boundary. A segment that had content
/// but lost all of it becomes `Unknown`.
#[must_use]
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .filter(|c| !RESERVED.contains(c) && !c.is_control())
        .collect();
    let mut collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed = collapsed.trim_matches(['.', ' ']).to_string();

    if collapsed.len() > MAX_SEGMENT_BYTES {
        let mut cut = MAX_SEGMENT_BYTES;
        while !collapsed.is_char_boundary(cut) {
            cut -= 1;
        }
        collapsed.truncate(cut);
        collapsed = collapsed.trim_end_matches(['.', ' ']).to_string();
    }

    if collapsed.is_empty() && !segment.trim().is_empty() {
        "Unknown".to_string()
    } else {
        collapsed
    }
}

fn leading_year(date: &str) -> Option<&str> {
    let head = date.get(..4)?;
    head.chars().all(|c| c.is_ascii_digit()).then_some(head)
}

fn placeholder_value(name: &str, meta: &TrackMetadata, file: &FileRow) -> String {
    let non_empty = |s: &Option<String>| s.as_deref().filter(|v| !v.trim().is_empty()).map(str::to_string);
    match name {
        "album_artist" => non_empty(&meta.album_artist)
            .or_else(|| non_empty(&meta.artist))
            .unwrap_or_else(|| "Unknown".to_string()),
        "artist" => non_empty(&meta.artist).unwrap_or_else(|| "Unknown".to_string()),
        "album" => non_empty(&meta.album).unwrap_or_default(),
        "title" => non_empty(&meta.title).unwrap_or_else(|| {
            file.src_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Unknown")
                .to_string()
        }),
        "date" => meta
            .date
            .as_deref()
            .and_then(leading_year)
            .unwrap_or_default()
            .to_string(),
        "track" => match meta.track_no {
            Some(track) if track > 0 => format!("{track:02}"),
            _ => String::new(),
        },
        "disc" => match (meta.disc_no, meta.disc_total) {
            // A disc level only helps multi-disc releases.
            (Some(disc), Some(total)) if disc >= 1 && total >= 2 => format!("Disc {disc}"),
            (Some(disc), None) if disc >= 2 => format!("Disc {disc}"),
            _ => String::new(),
        },
        "ext" => file
            .src_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Render `template` for one file under `dest_root`
///
/// Unknown placeholders render empty; segments that end up empty are
/// dropped, so `Artist/<missing album>/Title.flac` becomes
/// `Artist/Title.flac`.
#[must_use]
pub fn render(template: &str, dest_root: &Path, meta: &TrackMetadata, file: &FileRow) -> PathBuf {
    let mut rendered = String::with_capacity(template.len() * 2);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            rendered.push(c);
            continue;
        }
        let mut inner = String::new();
        for c in chars.by_ref() {
            if c == '}' {
                break;
            }
            inner.push(c);
        }
        let name_len = inner
            .chars()
            .take_while(|c| c.is_ascii_lowercase() || *c == '_')
            .count();
        let (name, decoration) = inner.split_at(name_len);
        let value = placeholder_value(name, meta, file);
        if !value.is_empty() {
            rendered.push_str(&value);
            rendered.push_str(decoration);
        }
    }

    let mut path = dest_root.to_path_buf();
    let mut segments = rendered.split('/').peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        if is_last {
            // Filename: sanitize the stem, keep the extension intact.
            let (stem, ext) = segment.rsplit_once('.').unwrap_or((segment, ""));
            let stem = sanitize_segment(stem);
            if stem.is_empty() {
                continue;
            }
            if ext.is_empty() {
                path.push(stem);
            } else {
                path.push(format!("{stem}.{ext}"));
            }
        } else {
            let sanitized = sanitize_segment(segment);
            if !sanitized.is_empty() {
                path.push(sanitized);
            }
        }
    }
    path
}
