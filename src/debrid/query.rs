use regex::Regex;
use std::sync::LazyLock;

use super::types::{MediaType, ParsedQuery};

static SXXEXX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bs(?:eason)?\s*(\d{1,2})\s*[xe]\s*(\d{1,3})\b").unwrap());

static WORDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bseason\s+(\d{1,2})\s+episode\s+(\d{1,3})\b").unwrap());

static LONE_SEASON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bs(\d{1,2})\b").unwrap());

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());

/// Catches titles like "My Show Season Special" that name a season/episode
/// without a numeric pattern any of the regexes above would match.
static LITERAL_SERIES_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(season|episode)\b").unwrap());

const STOP_TOKENS: &[&str] = &[
    "1080p", "720p", "2160p", "480p", "4k", "uhd", "hdr", "hdr10", "sdr",
    "web", "webrip", "web-dl", "webdl", "bluray", "blu-ray", "bdrip", "brrip", "dvdrip", "hdtv",
    "x264", "x265", "h264", "h265", "hevc", "avc", "xvid",
    "aac", "ac3", "dts", "flac", "atmos", "5.1", "7.1",
    "repack", "proper", "extended", "remastered", "limited", "internal",
];

/// Extracts title/season/episode/year/media-type signals from a free-text
/// release string. Pure function, no I/O; consumed both by the
/// file-selection heuristic and by scrapers building search requests.
pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut working = raw.to_string();
    let mut season = None;
    let mut episode = None;
    let mut has_season_match = false;

    if let Some(caps) = SXXEXX.captures(&working) {
        season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
        has_season_match = true;
        working = remove_match(&working, caps.get(0).unwrap().range());
    } else if let Some(caps) = WORDED.captures(&working) {
        season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
        has_season_match = true;
        working = remove_match(&working, caps.get(0).unwrap().range());
    } else if let Some(caps) = LONE_SEASON.captures(&working) {
        season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        episode = Some(1);
        has_season_match = true;
        working = remove_match(&working, caps.get(0).unwrap().range());
    }

    let year = YEAR.captures(&working).and_then(|caps| {
        let range = caps.get(0).unwrap().range();
        let value: u32 = caps.get(1).unwrap().as_str().parse().ok()?;
        working = remove_match(&working, range);
        Some(value)
    });

    let title = clean_title(&working);

    let media_type = if has_season_match || LITERAL_SERIES_WORD.is_match(&working) {
        MediaType::Series
    } else if year.is_some() {
        MediaType::Movie
    } else {
        MediaType::Unknown
    };

    ParsedQuery {
        raw: raw.to_string(),
        title,
        season,
        episode,
        year,
        media_type,
        has_season_match,
    }
}

fn remove_match(s: &str, range: std::ops::Range<usize>) -> String {
    let mut out = String::with_capacity(s.len());
    out.push_str(&s[..range.start]);
    out.push(' ');
    out.push_str(&s[range.end..]);
    out
}

fn clean_title(working: &str) -> String {
    let separators: &[char] = &['.', '_', '-'];
    working
        .split(|c: char| c.is_whitespace() || separators.contains(&c))
        .filter(|tok| !tok.is_empty())
        .filter(|tok| !STOP_TOKENS.contains(&tok.to_ascii_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Renders a canonical release string for the round-trip property
/// `parse_query(render(...)) == (title, year, season, episode)`.
pub fn render(title: &str, year: Option<u32>, season: Option<u32>, episode: Option<u32>) -> String {
    let mut parts = vec![title.to_string()];
    if let Some(year) = year {
        parts.push(year.to_string());
    }
    if let (Some(s), Some(e)) = (season, episode) {
        parts.push(format!("S{s:02}E{e:02}"));
    }
    parts.join(" ")
}
