use std::sync::LazyLock;

use regex::Regex;
use time::Date;

use super::drivers::http_util::{ARCHIVE_EXTENSIONS, MEDIA_EXTENSIONS, has_extension};
use super::types::{FileSelection, SelectionHints, TorrentFile};

static EXTRAS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sample|extras?|bonus|trailer|featurette)\b").unwrap()
});

static SXXEXX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bs(\d{1,2})\s*e(\d{1,3})\b").unwrap());

/// One candidate still in play, carrying the score it earned.
struct Scored<'a> {
    file: &'a TorrentFile,
    score: u8,
}

/// Runs the file-selection heuristic over a torrent's file list.
///
/// Deterministic: identical `files`/`hints` always produce identical
/// `FileSelection`.
pub fn select_files(files: &[TorrentFile], hints: &SelectionHints) -> FileSelection {
    let media_candidates: Vec<&TorrentFile> = files
        .iter()
        .filter(|f| has_extension(&f.path, MEDIA_EXTENSIONS))
        .filter(|f| !EXTRAS_PATTERN.is_match(&f.path))
        .collect();

    if media_candidates.is_empty() {
        let rejection = if files.iter().any(|f| has_extension(&f.path, ARCHIVE_EXTENSIONS)) {
            "release contains only archive files, no playable media".to_string()
        } else {
            "no media files found in torrent".to_string()
        };
        return FileSelection { rejection_reason: rejection, ..Default::default() };
    }

    let daily_filtered: Vec<&TorrentFile> = if hints.is_daily && hints.target_air_date.is_some() {
        let target = hints.target_air_date.unwrap();
        let matched: Vec<&TorrentFile> = media_candidates
            .iter()
            .copied()
            .filter(|f| filename_matches_air_date(&f.path, target, 1))
            .collect();
        if matched.is_empty() {
            return FileSelection {
                rejection_reason: "no file matches target air date".to_string(),
                ..Default::default()
            };
        }
        matched
    } else {
        media_candidates.clone()
    };

    let mut scored: Vec<Scored> = daily_filtered
        .iter()
        .map(|file| Scored { file, score: score_file(file, hints) })
        .collect();

    if !hints.is_movie && hints.expected_episode.is_some() {
        let has_any_match = scored.iter().any(|s| s.score > 0);
        if !has_any_match {
            return FileSelection {
                rejection_reason: "no candidate file matches the target episode".to_string(),
                ..Default::default()
            };
        }
    }

    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.file.bytes.cmp(&a.file.bytes))
            .then_with(|| a.file.path.cmp(&b.file.path))
    });

    let ordered_ids: Vec<String> = scored.iter().map(|s| s.file.id.clone()).collect();
    let preferred = scored.first().expect("non-empty after filtering");

    FileSelection {
        ordered_ids,
        preferred_id: preferred.file.id.clone(),
        preferred_label: preferred.file.path.clone(),
        preferred_reason: describe_reason(preferred.score, hints),
        rejection_reason: String::new(),
    }
}

fn score_file(file: &TorrentFile, hints: &SelectionHints) -> u8 {
    if let Some(code) = &hints.episode_code {
        if file.path.to_ascii_lowercase().contains(&code.to_ascii_lowercase()) {
            return 3;
        }
    }
    if let (Some(season), Some(episode)) = (hints.expected_season, hints.expected_episode) {
        if let Some(caps) = SXXEXX.captures(&file.path) {
            let found_season: Option<u32> = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let found_episode: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
            if found_season == Some(season) && found_episode == Some(episode) {
                return 3;
            }
        }
        let lower = file.path.to_ascii_lowercase();
        let season_token = format!("{season}");
        let episode_token = format!("{episode}");
        if lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|tok| tok == season_token)
            && lower
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|tok| tok == episode_token)
        {
            return 2;
        }
    }
    0
}

fn describe_reason(score: u8, hints: &SelectionHints) -> String {
    match score {
        3 if hints.episode_code.is_some() => "matched episode code".to_string(),
        3 => "matched season/episode pattern".to_string(),
        2 => "matched separated season and episode tokens".to_string(),
        _ if hints.is_movie => "largest file".to_string(),
        _ => "largest remaining file, no episode tokens matched".to_string(),
    }
}

/// Stands in for the external "media-resolve" utility's
/// `CandidateMatchesDailyDate`: looks for the target date (or a date within
/// `fuzz_days`) written as `YYYY.MM.DD`, `YYYY-MM-DD`, or `MM.DD.YYYY` in the
/// filename.
fn filename_matches_air_date(filename: &str, target: Date, fuzz_days: i64) -> bool {
    for offset in -fuzz_days..=fuzz_days {
        let Some(candidate) = target.checked_add(time::Duration::days(offset)) else {
            continue;
        };
        let iso = format!(
            "{:04}.{:02}.{:02}",
            candidate.year(),
            u8::from(candidate.month()),
            candidate.day()
        );
        let iso_dash = iso.replace('.', "-");
        let us = format!(
            "{:02}.{:02}.{:04}",
            u8::from(candidate.month()),
            candidate.day(),
            candidate.year()
        );
        if filename.contains(&iso) || filename.contains(&iso_dash) || filename.contains(&us) {
            return true;
        }
    }
    false
}
