//! Identity normalization
//!
//! Pure functions that collapse tag variance so duplicate recordings land on
//! the same cluster key: artist/title normalization, version-type detection,
//! and duration bucketing. The optional external canonicalizer lives in
//! [`musicbrainz`].

pub mod musicbrainz;

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Coarse rendition category; keeps a live take from clustering with its
/// studio counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionType {
    /// Plain studio recording
    #[default]
    Studio,
    /// Remixed rendition
    Remix,
    /// Live rendition
    Live,
    /// Acoustic rendition
    Acoustic,
    /// Demo take
    Demo,
    /// Instrumental rendition
    Instrumental,
}

impl VersionType {
    /// Key segment representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Studio => "studio",
            Self::Remix => "remix",
            Self::Live => "live",
            Self::Acoustic => "acoustic",
            Self::Demo => "demo",
            Self::Instrumental => "instrumental",
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "studio" => Ok(Self::Studio),
            "remix" => Ok(Self::Remix),
            "live" => Ok(Self::Live),
            "acoustic" => Ok(Self::Acoustic),
            "demo" => Ok(Self::Demo),
            "instrumental" => Ok(Self::Instrumental),
            _ => Err(()),
        }
    }
}

/// Fold common Latin diacritics onto their ASCII base letter
///
/// Covers Latin-1 Supplement and Latin Extended-A; anything else passes
/// through for the non-alphanumeric collapse to drop.
fn fold_diacritic(c: char) -> Option<char> {
    let folded = match c {
        'à'..='å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' | 'đ' | 'ð' => 'd',
        'è'..='ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ĥ' | 'ħ' => 'h',
        'ì'..='ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ò'..='ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'ţ' | 'ť' | 'ŧ' => 't',
        'ù'..='ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ŵ' => 'w',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        'ß' => 's',
        'þ' => 't',
        'æ' => 'a',
        'œ' => 'o',
        _ => return None,
    };
    Some(folded)
}

/// Lowercase, fold diacritics, collapse runs of non-alphanumerics to one
/// space, trim.
fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        let c = fold_diacritic(c).unwrap_or(c);
        if c.is_ascii_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Normalize an artist name for keying
#[must_use]
pub fn normalize_artist(s: &str) -> String {
    normalize_text(s)
}

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    // Trailing parenthesized/bracketed rendition qualifiers, e.g.
    // "Song (Live)", "Song [Acoustic Version]", "Song - 2011 Remaster".
    Regex::new(
        r"(?i)\s*[(\[\-–]+\s*(?:\d{4}\s+)?(live|acoustic|demo|instrumental|remix|mix|edit|version|remaster(?:ed)?|mono|stereo|deluxe|single|radio|extended|unplugged)(?:[^)\]]*)?[)\]]?\s*$",
    )
    .expect("version suffix regex")
});

/// Normalize a title for keying: [`normalize_artist`] plus removal of known
/// trailing version qualifiers
///
/// Idempotent: normalizing a normalized title is a no-op.
#[must_use]
pub fn normalize_title(s: &str) -> String {
    let mut stripped = s.to_string();
    // Qualifiers can stack ("Song (Live) [2001 Remaster]").
    loop {
        let next = VERSION_SUFFIX.replace(&stripped, "").to_string();
        if next == stripped {
            break;
        }
        stripped = next;
    }
    normalize_text(&stripped)
}

static VERSION_KEYWORDS: &[(&str, VersionType)] = &[
    ("remix", VersionType::Remix),
    ("live", VersionType::Live),
    ("acoustic", VersionType::Acoustic),
    ("unplugged", VersionType::Acoustic),
    ("demo", VersionType::Demo),
    ("instrumental", VersionType::Instrumental),
];

/// Detect the rendition category from a raw title
///
/// Keywords match case-insensitively on whole-word boundaries, so
/// "Alive" stays studio while "Song (Live)" is live.
#[must_use]
pub fn detect_version_type(title: &str) -> VersionType {
    let lowered = normalize_text(title);
    for word in lowered.split(' ') {
        for (keyword, version) in VERSION_KEYWORDS {
            if word == *keyword {
                return *version;
            }
        }
    }
    VersionType::Studio
}

/// Bucket size for duration keying
pub const DURATION_BUCKET_MS: u64 = 3000;

/// Round a duration to the nearest 3 s bucket, in seconds
///
/// Files within ±1.5 s of each other share a bucket, tolerating encoder
/// padding drift.
#[must_use]
pub fn bucket_duration(duration_ms: u64) -> u64 {
    ((duration_ms + DURATION_BUCKET_MS / 2) / DURATION_BUCKET_MS) * DURATION_BUCKET_MS / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artist_normalization_collapses_case_and_punctuation() {
        assert_eq!(normalize_artist("ABBA"), "abba");
        assert_eq!(normalize_artist("  Abba  "), "abba");
        assert_eq!(normalize_artist("AC/DC"), "ac dc");
        assert_eq!(normalize_artist("Sigur Rós"), "sigur ros");
        assert_eq!(normalize_artist("Motörhead"), "motorhead");
    }

    #[test]
    fn title_normalization_strips_version_suffixes() {
        assert_eq!(normalize_title("SOS"), "sos");
        assert_eq!(normalize_title("Song (Live)"), "song");
        assert_eq!(normalize_title("Song [Acoustic Version]"), "song");
        assert_eq!(normalize_title("Song - 2011 Remaster"), "song");
        assert_eq!(normalize_title("Song (Live) [2001 Remaster]"), "song");
    }

    #[test]
    fn title_normalization_is_idempotent() {
        for title in ["SOS", "Song (Live)", "Näkyjä [Demo]", "Plain Title"] {
            let once = normalize_title(title);
            assert_eq!(normalize_title(&once), once);
        }
    }

    #[test]
    fn version_detection_needs_word_boundaries() {
        assert_eq!(detect_version_type("Alive"), VersionType::Studio);
        assert_eq!(detect_version_type("Staying Alive"), VersionType::Studio);
        assert_eq!(detect_version_type("Song (Live)"), VersionType::Live);
        assert_eq!(detect_version_type("song LIVE at Wembley"), VersionType::Live);
        assert_eq!(detect_version_type("Song (Acoustic)"), VersionType::Acoustic);
        assert_eq!(detect_version_type("Demolition"), VersionType::Studio);
        assert_eq!(detect_version_type("Song (demo)"), VersionType::Demo);
        assert_eq!(detect_version_type("Song (Instrumental)"), VersionType::Instrumental);
        assert_eq!(detect_version_type("Song (Radio Remix)"), VersionType::Remix);
    }

    #[test]
    fn duration_buckets_group_neighbors() {
        // 5:00.00 and 5:00.40 land together.
        assert_eq!(bucket_duration(300_000), bucket_duration(300_400));
        // ±1.5s boundary behavior.
        assert_eq!(bucket_duration(300_000), bucket_duration(301_499));
        assert_ne!(bucket_duration(300_000), bucket_duration(301_500));
        // Buckets are expressed in seconds.
        assert_eq!(bucket_duration(300_000), 300);
        assert_eq!(bucket_duration(0), 0);
    }

    #[test]
    fn version_type_round_trips() {
        for v in [
            VersionType::Studio,
            VersionType::Remix,
            VersionType::Live,
            VersionType::Acoustic,
            VersionType::Demo,
            VersionType::Instrumental,
        ] {
            assert_eq!(v.as_str().parse::<VersionType>().unwrap(), v);
        }
    }
}
