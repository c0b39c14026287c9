//! Timestamps embedded in recording filenames and deployment folder names.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::OnceLock;

fn filename_ts_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)_(?:(\d{8}T\d{6})Z|(\d{12}))\.(?:flac|wav)$").expect("valid regex")
    })
}

fn set_folder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(sanctsound_[a-z]{2}\d{2}_\d{2})").expect("valid regex"))
}

fn file_deployment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(sanctsound_[a-z]{2}\d{2}_\d{2})_").expect("valid regex"))
}

/// Parse the recording start encoded in a filename.
///
/// Two encodings are recognised: `..._YYYYMMDDThhmmssZ.flac` and
/// `..._YYMMDDhhmmss.flac` (also `.wav`). Two-digit years `00..=69` map to
/// the 2000s and `70..=99` to the 1900s. Anything else yields `None`.
pub fn parse_audio_start_from_name(name: &str) -> Option<DateTime<Utc>> {
    let caps = filename_ts_re().captures(name)?;

    if let Some(long) = caps.get(1) {
        let naive = NaiveDateTime::parse_from_str(long.as_str(), "%Y%m%dT%H%M%S").ok()?;
        return Some(naive.and_utc());
    }

    let s = caps.get(2)?.as_str();
    let field = |range: std::ops::Range<usize>| s[range].parse::<u32>().ok();
    let yy = field(0..2)? as i32;
    let year = if yy <= 69 { 2000 + yy } else { 1900 + yy };

    NaiveDate::from_ymd_opt(year, field(2..4)?, field(4..6)?)?
        .and_hms_opt(field(6..8)?, field(8..10)?, field(10..12)?)
        .map(|naive| naive.and_utc())
}

/// Same as [`parse_audio_start_from_name`] but for a full path or URL.
pub fn parse_audio_start_from_url(url: &str) -> Option<DateTime<Utc>> {
    parse_audio_start_from_name(basename(url))
}

/// Last path component of a `/`-separated path or URL.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Deployment folder (e.g. `sanctsound_ci01_01`) named by a product set.
pub fn folder_from_set(set_name: &str) -> Option<String> {
    set_folder_re()
        .captures(set_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Deployment folder a recording belongs to, read from its filename prefix.
pub fn deployment_from_filename(name: &str) -> Option<String> {
    file_deployment_re()
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// `YYYYMMDDTHHMMSS`, used in clip filenames.
pub fn compact_stamp(t: &DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%S").to_string()
}

/// ISO-8601 with a `Z` suffix, used in manifests and debug dumps.
pub fn iso(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 instant (e.g. `2024-01-01T00:00:00Z`) into UTC.
pub fn parse_iso_utc(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_long_form() {
        let t = parse_audio_start_from_name("SanctSound_CI01_01_20181101T000000Z.flac").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2018, 11, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_short_form_year_pivot() {
        let t = parse_audio_start_from_name("SanctSound_CI01_01_671403_190102030405.flac").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2019, 1, 2, 3, 4, 5).unwrap());

        let t = parse_audio_start_from_name("rec_690102030405.wav").unwrap();
        assert_eq!(t.format("%Y").to_string(), "2069");

        let t = parse_audio_start_from_name("rec_700102030405.wav").unwrap();
        assert_eq!(t.format("%Y").to_string(), "1970");
    }

    #[test]
    fn test_parse_is_case_insensitive_on_extension() {
        assert!(parse_audio_start_from_name("a_20200101T010203Z.FLAC").is_some());
    }

    #[test]
    fn test_unparsable_names() {
        assert!(parse_audio_start_from_name("notes.txt").is_none());
        assert!(parse_audio_start_from_name("a_20200101T010203Z.mp3").is_none());
        assert!(parse_audio_start_from_name("a_20201301T010203Z.flac").is_none());
        assert!(parse_audio_start_from_name("a_991332000000.flac").is_none());
    }

    #[test]
    fn test_parse_from_url() {
        let url = "gs://bucket/sanctsound/audio/ci01/sanctsound_ci01_01/audio/x_20181101T010000Z.flac";
        assert_eq!(
            parse_audio_start_from_url(url),
            Some(Utc.with_ymd_and_hms(2018, 11, 1, 1, 0, 0).unwrap())
        );
        assert_eq!(basename(url), "x_20181101T010000Z.flac");
    }

    #[test]
    fn test_folder_from_set() {
        assert_eq!(
            folder_from_set("SanctSound_CI01_02_dolphins_1h").as_deref(),
            Some("sanctsound_ci01_02")
        );
        assert_eq!(folder_from_set("something_else"), None);
    }

    #[test]
    fn test_deployment_from_filename() {
        assert_eq!(
            deployment_from_filename("SanctSound_MB02_03_20200101T000000Z.flac").as_deref(),
            Some("sanctsound_mb02_03")
        );
        assert_eq!(deployment_from_filename("x_20200101T000000Z.flac"), None);
    }

    #[test]
    fn test_stamp_formats() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        assert_eq!(compact_stamp(&t), "20240101T003000");
        assert_eq!(iso(&t), "2024-01-01T00:30:00Z");
        assert_eq!(parse_iso_utc("2024-01-01T00:30:00Z"), Some(t));
        assert_eq!(parse_iso_utc("yesterday"), None);
    }
}
