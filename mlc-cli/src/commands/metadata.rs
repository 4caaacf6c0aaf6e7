//! `mlc metadata`: query stored metadata by tag filters

use mlc_core::config::Config;
use mlc_core::model::{FileRow, FileStatus, TrackMetadata};
use mlc_core::CancelToken;
use serde_json::json;

use super::build_context;
use crate::error::{CliError, CliResult};

fn contains_ci(haystack: &Option<String>, needle: &str) -> bool {
    haystack
        .as_deref()
        .is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

fn is_missing(meta: &TrackMetadata, field: &str) -> CliResult<bool> {
    let missing = match field {
        "artist" => meta.artist.as_deref().unwrap_or("").is_empty(),
        "album" => meta.album.as_deref().unwrap_or("").is_empty(),
        "album_artist" => meta.album_artist.as_deref().unwrap_or("").is_empty(),
        "title" => meta.title.as_deref().unwrap_or("").is_empty(),
        "date" => meta.date.as_deref().unwrap_or("").is_empty(),
        "track" => meta.track_no.unwrap_or(0) == 0,
        other => {
            return Err(CliError::Usage(format!(
                "unknown field '{other}' (expected artist, album, album_artist, title, date, track)"
            )));
        }
    };
    Ok(missing)
}

fn emit_human(file: &FileRow, meta: &TrackMetadata) {
    println!(
        "{} | {} - {} [{}] ({})",
        file.src_path.display(),
        meta.artist.as_deref().unwrap_or("?"),
        meta.title.as_deref().unwrap_or("?"),
        meta.album.as_deref().unwrap_or("?"),
        meta.format.as_deref().unwrap_or("?"),
    );
}

fn emit_jsonl(file: &FileRow, meta: &TrackMetadata) {
    let value = json!({
        "src_path": file.src_path,
        "file_key": file.file_key,
        "artist": meta.artist,
        "album": meta.album,
        "album_artist": meta.album_artist,
        "title": meta.title,
        "track": meta.track_no,
        "disc": meta.disc_no,
        "date": meta.date,
        "codec": meta.codec,
        "bitrate_kbps": meta.bitrate_kbps,
        "sample_rate_hz": meta.sample_rate_hz,
        "lossless": meta.lossless,
        "duration_ms": meta.duration_ms,
    });
    println!("{value}");
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn emit_csv(file: &FileRow, meta: &TrackMetadata) {
    let fields = [
        file.src_path.display().to_string(),
        meta.artist.clone().unwrap_or_default(),
        meta.album.clone().unwrap_or_default(),
        meta.title.clone().unwrap_or_default(),
        meta.track_no.map(|t| t.to_string()).unwrap_or_default(),
        meta.date.clone().unwrap_or_default(),
        meta.codec.clone().unwrap_or_default(),
        meta.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
    ];
    let line: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
    println!("{}", line.join(","));
}

pub fn run(
    config: &Config,
    artist: Option<String>,
    album: Option<String>,
    title: Option<String>,
    missing: Option<String>,
    output: &str,
) -> CliResult<()> {
    if !matches!(output, "human" | "jsonl" | "csv") {
        return Err(CliError::Usage(format!(
            "unknown output format '{output}' (expected human, jsonl, csv)"
        )));
    }
    let ctx = build_context(config.clone(), &CancelToken::new(), false)?;

    if output == "csv" {
        println!("src_path,artist,album,title,track,date,codec,duration_ms");
    }

    let files = ctx
        .db
        .files_with_status(&[FileStatus::MetaOk, FileStatus::Executed, FileStatus::Skipped])
        .map_err(|e| CliError::Fatal(e.to_string()))?;
    let mut matched = 0u64;
    for file in files {
        let Some(meta) = ctx
            .db
            .get_metadata(file.id)
            .map_err(|e| CliError::Fatal(e.to_string()))?
        else {
            continue;
        };
        if let Some(artist) = &artist {
            if !contains_ci(&meta.artist, artist) && !contains_ci(&meta.album_artist, artist) {
                continue;
            }
        }
        if let Some(album) = &album {
            if !contains_ci(&meta.album, album) {
                continue;
            }
        }
        if let Some(title) = &title {
            if !contains_ci(&meta.title, title) {
                continue;
            }
        }
        if let Some(field) = &missing {
            if !is_missing(&meta, field)? {
                continue;
            }
        }
        matched += 1;
        match output {
            "jsonl" => emit_jsonl(&file, &meta),
            "csv" => emit_csv(&file, &meta),
            _ => emit_human(&file, &meta),
        }
    }
    if output == "human" {
        println!("---\n{matched} files matched");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_validation() {
        let meta = TrackMetadata::default();
        assert!(is_missing(&meta, "artist").unwrap());
        assert!(is_missing(&meta, "track").unwrap());
        assert!(is_missing(&meta, "bogus").is_err());

        let tagged = TrackMetadata {
            artist: Some("ABBA".into()),
            track_no: Some(4),
            ..Default::default()
        };
        assert!(!is_missing(&tagged, "artist").unwrap());
        assert!(!is_missing(&tagged, "track").unwrap());
    }

    #[test]
    fn csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn case_insensitive_contains() {
        assert!(contains_ci(&Some("ABBA".into()), "abba"));
        assert!(contains_ci(&Some("The Beatles".into()), "beat"));
        assert!(!contains_ci(&None, "x"));
    }
}
