//! Metadata probe backends
//!
//! Two independent probes feed the extractor: a fast tag-only reader and a
//! symphonia-based audio probe that also reports stream properties. Both are
//! read-only and safe for concurrent calls; the extractor merges their
//! results field by field.

use std::fs::File;
use std::path::Path;

use id3::TagLike;

use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, Value};
use symphonia::core::probe::Hint;

use crate::error::{AppError, Result};
use crate::model::{TagValue, TrackMetadata};

/// Tag-only probe: cheap, no stream decoding
pub trait TagProbe: Send + Sync {
    /// Read tags from `path` without modifying the file
    ///
    /// # Errors
    /// Returns `Unsupported` for formats the probe cannot read and
    /// `Corrupt` for undecodable tag data.
    fn read(&self, path: &Path) -> Result<TrackMetadata>;
}

/// Audio probe: stream properties plus tags
pub trait AudioProbe: Send + Sync {
    /// Read stream properties and tags from `path` without modifying it
    ///
    /// # Errors
    /// Returns `Unsupported` for unknown containers and `Corrupt` for files
    /// that fail to parse.
    fn read(&self, path: &Path) -> Result<TrackMetadata>;
}

/// Parse "4" or "4/12" into the leading integer
fn parse_index(s: &str) -> Option<u32> {
    s.split('/').next()?.trim().parse().ok()
}

/// Parse the "12" of "4/12", when present
fn parse_index_total(s: &str) -> Option<u32> {
    s.split('/').nth(1)?.trim().parse().ok()
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(str::to_lowercase)
}

// ---------------------------------------------------------------------------
// Tag probe
// ---------------------------------------------------------------------------

/// Default [`TagProbe`]: id3 for MP3, mp4ameta for the MP4 family, symphonia
/// metadata for everything else
#[derive(Debug, Default, Clone, Copy)]
pub struct TagReader;

impl TagProbe for TagReader {
    fn read(&self, path: &Path) -> Result<TrackMetadata> {
        match lowercase_extension(path).as_deref() {
            Some("mp3") => read_id3(path),
            Some("m4a" | "m4b" | "mp4" | "aac") => read_mp4(path),
            _ => {
                // Symphonia parses the container far enough to surface tags
                // without touching the audio stream.
                probe_symphonia(path, true)
            }
        }
    }
}

fn read_id3(path: &Path) -> Result<TrackMetadata> {
    let tag = match id3::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => return Ok(TrackMetadata::default()),
        Err(e) => return Err(AppError::Corrupt(format!("id3: {e}"))),
    };
    let mut meta = TrackMetadata {
        artist: tag.artist().map(str::to_string),
        album: tag.album().map(str::to_string),
        album_artist: tag.album_artist().map(str::to_string),
        title: tag.title().map(str::to_string),
        track_no: tag.track(),
        track_total: tag.total_tracks(),
        disc_no: tag.disc(),
        disc_total: tag.total_discs(),
        date: tag
            .date_recorded()
            .map(|t| t.to_string())
            .or_else(|| tag.year().map(|y| y.to_string())),
        ..Default::default()
    };
    for frame in tag.frames() {
        let value = match frame.content() {
            id3::Content::Text(s) => TagValue::Text(s.clone()),
            id3::Content::ExtendedText(ext) => TagValue::Text(ext.value.clone()),
            id3::Content::Comment(c) => TagValue::Text(c.text.clone()),
            id3::Content::Unknown(u) => TagValue::Blob(u.data.clone()),
            _ => continue,
        };
        meta.raw_tags.insert(frame.id().to_string(), value);
    }
    meta.compilation = meta
        .raw_tags
        .get("TCMP")
        .is_some_and(TagValue::is_truthy);
    Ok(meta)
}

fn read_mp4(path: &Path) -> Result<TrackMetadata> {
    let tag = mp4ameta::Tag::read_from_path(path)
        .map_err(|e| AppError::Corrupt(format!("mp4ameta: {e}")))?;
    let mut meta = TrackMetadata {
        artist: tag.artist().map(str::to_string),
        album: tag.album().map(str::to_string),
        album_artist: tag.album_artist().map(str::to_string),
        title: tag.title().map(str::to_string),
        track_no: tag.track_number().map(u32::from),
        track_total: tag.total_tracks().map(u32::from),
        disc_no: tag.disc_number().map(u32::from),
        disc_total: tag.total_discs().map(u32::from),
        date: tag.year().map(str::to_string),
        compilation: tag.compilation(),
        ..Default::default()
    };
    if meta.compilation {
        meta.raw_tags
            .insert("cpil".to_string(), TagValue::Flag(true));
    }
    for (ident, data) in tag.data() {
        let key = ident.to_string();
        if meta.raw_tags.contains_key(&key) {
            continue;
        }
        match data {
            mp4ameta::Data::Utf8(s) | mp4ameta::Data::Utf16(s) => {
                meta.raw_tags.insert(key, TagValue::Text(s.clone()));
            }
            mp4ameta::Data::Reserved(b) | mp4ameta::Data::BeSigned(b) => {
                meta.raw_tags.insert(key, TagValue::Blob(b.clone()));
            }
            _ => {}
        }
    }
    Ok(meta)
}

// ---------------------------------------------------------------------------
// Audio probe
// ---------------------------------------------------------------------------

/// Default [`AudioProbe`] built on symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaProbe;

impl AudioProbe for SymphoniaProbe {
    fn read(&self, path: &Path) -> Result<TrackMetadata> {
        probe_symphonia(path, false)
    }
}

/// Codecs whose decoded output is bit-identical to the source
fn is_lossless_codec(name: &str) -> bool {
    matches!(name, "flac" | "alac" | "wav" | "ape" | "wavpack" | "tta") || name.starts_with("pcm")
}

fn probe_symphonia(path: &Path, tags_only: bool) -> Result<TrackMetadata> {
    let file = File::open(path)?;
    let size_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = lowercase_extension(path) {
        hint.with_extension(&ext);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| match e {
            symphonia::core::errors::Error::Unsupported(_) => {
                AppError::Unsupported(format!("{}: unsupported container", path.display()))
            }
            symphonia::core::errors::Error::IoError(io) => AppError::Io(io.to_string()),
            other => AppError::Corrupt(format!("{}: {other}", path.display())),
        })?;

    let mut meta = TrackMetadata {
        container: lowercase_extension(path),
        format: lowercase_extension(path).map(|e| e.to_uppercase()),
        ..Default::default()
    };

    if !tags_only {
        if let Some(track) = probed.format.default_track() {
            apply_codec_params(&mut meta, &track.codec_params, size_bytes);
        }
    }

    // Tags can sit on the container or on the probe result depending on the
    // format; fold both in, container first.
    let format_meta = probed.format.metadata();
    if let Some(revision) = format_meta.current() {
        apply_tag_revision(&mut meta, revision);
    }
    drop(format_meta);
    let probe_meta = probed.metadata.get();
    if let Some(revision) = probe_meta.as_ref().and_then(|m| m.current()) {
        apply_tag_revision(&mut meta, revision);
    }
    meta.compilation = meta.compilation
        || ["TCMP", "cpil", "COMPILATION", "compilation"]
            .iter()
            .any(|k| meta.raw_tags.get(*k).is_some_and(TagValue::is_truthy));
    Ok(meta)
}

fn apply_codec_params(meta: &mut TrackMetadata, params: &CodecParameters, size_bytes: u64) {
    let codec_name = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|d| d.short_name.to_lowercase());
    meta.sample_rate_hz = params.sample_rate;
    meta.bit_depth = params.bits_per_sample;
    meta.channels = params.channels.map(|c| c.count() as u32);
    if let (Some(n_frames), Some(tb)) = (params.n_frames, params.time_base) {
        let time = tb.calc_time(n_frames);
        meta.duration_ms = Some(time.seconds * 1000 + (time.frac * 1000.0) as u64);
    }
    if let Some(name) = codec_name {
        meta.lossless = is_lossless_codec(&name);
        meta.codec = Some(name);
    }
    // Average bitrate from container size when the stream does not carry one.
    if let Some(duration_ms) = meta.duration_ms {
        if duration_ms > 0 && size_bytes > 0 {
            meta.bitrate_kbps = Some((size_bytes * 8 / duration_ms) as u32);
        }
    }
}

fn apply_tag_revision(meta: &mut TrackMetadata, revision: &MetadataRevision) {
    for tag in revision.tags() {
        let text = match &tag.value {
            Value::String(s) => Some(s.clone()),
            Value::UnsignedInt(n) => Some(n.to_string()),
            Value::SignedInt(n) => Some(n.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        };
        if let Some(text) = &text {
            let raw = match &tag.value {
                Value::UnsignedInt(n) => TagValue::Int(*n as i64),
                Value::SignedInt(n) => TagValue::Int(*n),
                Value::Boolean(b) => TagValue::Flag(*b),
                _ => TagValue::Text(text.clone()),
            };
            meta.raw_tags.entry(tag.key.clone()).or_insert(raw);
        }
        let Some(std_key) = tag.std_key else { continue };
        let Some(text) = text else { continue };
        match std_key {
            StandardTagKey::Artist => fill(&mut meta.artist, text),
            StandardTagKey::Album => fill(&mut meta.album, text),
            StandardTagKey::AlbumArtist => fill(&mut meta.album_artist, text),
            StandardTagKey::TrackTitle => fill(&mut meta.title, text),
            StandardTagKey::TrackNumber => {
                if meta.track_no.is_none() {
                    meta.track_no = parse_index(&text);
                }
                if meta.track_total.is_none() {
                    meta.track_total = parse_index_total(&text);
                }
            }
            StandardTagKey::TrackTotal => {
                if meta.track_total.is_none() {
                    meta.track_total = parse_index(&text);
                }
            }
            StandardTagKey::DiscNumber => {
                if meta.disc_no.is_none() {
                    meta.disc_no = parse_index(&text);
                }
                if meta.disc_total.is_none() {
                    meta.disc_total = parse_index_total(&text);
                }
            }
            StandardTagKey::DiscTotal => {
                if meta.disc_total.is_none() {
                    meta.disc_total = parse_index(&text);
                }
            }
            StandardTagKey::Date | StandardTagKey::ReleaseDate | StandardTagKey::OriginalDate => {
                fill(&mut meta.date, text);
            }
            StandardTagKey::Compilation => {
                meta.compilation =
                    meta.compilation || TagValue::Text(text).is_truthy();
            }
            _ => {}
        }
    }
}

fn fill(slot: &mut Option<String>, value: String) {
    if slot.as_deref().is_none_or(str::is_empty) && !value.is_empty() {
        *slot = Some(value);
    }
}
