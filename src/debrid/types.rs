use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One torrent proposal from a search scraper.
///
/// Constructed by scrapers, consumed by the resolver, never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseCandidate {
    pub title: String,
    /// Either a `magnet:` URI or an HTTP `.torrent` URL.
    ///
    /// Empty only when `preresolved` is set in `attributes`.
    pub link: String,
    pub size_bytes: u64,
    pub service_type: ServiceType,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Debrid,
}

impl ReleaseCandidate {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_preresolved(&self) -> bool {
        self.attr("preresolved") == Some("true")
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.attr("stream_url")
    }

    pub fn info_hash(&self) -> Option<&str> {
        self.attr("infoHash")
    }

    pub fn torrent_url(&self) -> Option<&str> {
        self.attr("torrentURL")
    }

    pub fn preferred_provider(&self) -> Option<&str> {
        self.attr("provider")
    }

    pub fn is_magnet(&self) -> bool {
        self.link.starts_with("magnet:")
    }
}

/// Per-provider configuration. Loaded from the external config store at each
/// resolution; never mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub api_key: String,
    pub enabled: bool,
    /// Position in the ordered provider list; lower sorts first.
    pub priority: u32,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ProviderSettings {
    pub fn option_bool(&self, key: &str) -> bool {
        self.options
            .get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Returned after registering a magnet or file with a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddResult {
    /// Provider-scoped, opaque.
    pub id: String,
    pub uri: String,
}

/// Canonical cache-status vocabulary. The core recognizes only `Downloaded`
/// as "cached and ready"; everything else funnels into `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorrentStatus {
    Downloaded,
    Downloading,
    Queued,
    Error,
    Other(String),
}

impl TorrentStatus {
    pub fn from_native(word: &str) -> Self {
        match word.to_ascii_lowercase().as_str() {
            // AllDebrid reports a fully-cached magnet as "Ready" rather than "downloaded".
            "downloaded" | "ready" => TorrentStatus::Downloaded,
            "downloading" => TorrentStatus::Downloading,
            "queued" | "waiting_files_selection" | "magnet_conversion" => TorrentStatus::Queued,
            "error" | "dead" | "virus" => TorrentStatus::Error,
            other => TorrentStatus::Other(other.to_string()),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, TorrentStatus::Downloaded)
    }
}

/// One file entry inside a torrent, as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentFile {
    pub id: String,
    pub path: String,
    pub bytes: u64,
    pub selected: bool,
}

/// Snapshot returned by a provider for a registered torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub id: String,
    pub filename: String,
    pub hash: String,
    pub bytes: u64,
    pub status: TorrentStatus,
    pub files: Vec<TorrentFile>,
    /// Aligns positionally with selected files; semantics vary per provider.
    pub links: Vec<String>,
}

impl TorrentInfo {
    /// Files with `selected = true`, in ascending file-ID order.
    ///
    /// This ordering is the empirical basis for the `links[i]` <-> selected-file
    /// mapping documented in the resolver.
    pub fn selected_files_ascending(&self) -> Vec<&TorrentFile> {
        let mut selected: Vec<&TorrentFile> =
            self.files.iter().filter(|f| f.selected).collect();
        selected.sort_by(|a, b| file_id_order(&a.id, &b.id));
        selected
    }
}

fn file_id_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Result of the file-selection heuristic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSelection {
    /// What to send to the provider's selection endpoint.
    pub ordered_ids: Vec<String>,
    /// The file to stream.
    pub preferred_id: String,
    pub preferred_label: String,
    pub preferred_reason: String,
    pub rejection_reason: String,
}

impl FileSelection {
    pub fn is_rejected(&self) -> bool {
        !self.rejection_reason.is_empty()
    }
}

/// Hints used by the file-selection heuristic, built from the release title
/// and the target episode descriptor.
#[derive(Debug, Clone, Default)]
pub struct SelectionHints {
    pub expected_season: Option<u32>,
    pub expected_episode: Option<u32>,
    pub episode_code: Option<String>,
    pub is_daily: bool,
    pub target_air_date: Option<time::Date>,
    pub is_movie: bool,
}

/// `{ID, Filename, MimeType, Filesize, DownloadURL}`. `download_url` is the
/// final direct HTTP URL, or an internal reference the provider will
/// re-resolve at stream time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnrestrictResult {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub filesize: u64,
    pub download_url: String,
}

/// The opaque string the player hands back to the streaming endpoint, or for
/// pre-resolved candidates, the direct URL itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackResolution {
    pub webdav_path: String,
    pub health_status: HealthStatus,
    pub file_size: u64,
    pub source_nzb_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Cached,
    PreResolved,
}

/// One element of a batch resolution's input sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEpisodeTarget {
    pub season_number: u32,
    pub episode_number: u32,
    pub episode_code: String,
}

/// Either a resolution or an error string for one episode target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEpisodeResult {
    pub target: BatchEpisodeTarget,
    pub resolution: Option<PlaybackResolution>,
    pub error: Option<String>,
}

/// What scrapers produce and the resolver consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub title: String,
    pub indexer: String,
    pub magnet: Option<String>,
    pub torrent_url: Option<String>,
    pub info_hash: Option<String>,
    pub file_index: Option<u32>,
    pub size_bytes: u64,
    pub seeders: u32,
    pub provider: Option<String>,
    pub resolution: Option<String>,
    pub meta_name: Option<String>,
    pub meta_id: Option<String>,
    pub source: Option<String>,
    pub service_type: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Normalized signals extracted from a free-text release string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub raw: String,
    pub title: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u32>,
    pub media_type: MediaType,
    pub has_season_match: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Unknown,
    Movie,
    Series,
}
