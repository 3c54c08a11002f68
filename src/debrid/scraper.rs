use async_trait::async_trait;
use time::Date;

use super::error::EngineResult;
use super::types::{ParsedQuery, ScrapeResult};

/// What the resolver sends a scraper to run a search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub parsed: ParsedQuery,
    pub imdb_id: Option<String>,
    pub max_results: usize,
    pub is_daily: bool,
    pub target_air_date: Option<Date>,
}

/// A pluggable release-search backend (torznab, stremio, RSS, ...).
///
/// Out of scope for this engine's algorithms; only the contract lives here so
/// the resolver and health service can be exercised against fakes.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, request: &SearchRequest) -> EngineResult<Vec<ScrapeResult>>;
}
