use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::magnet::extract_info_hash;
use super::provider::Provider;
use super::registration::register_candidate;
use super::selection::select_files;
use super::types::{ReleaseCandidate, SelectionHints};

/// Health check is throttled to the first N candidates in a result list,
/// bounding API spend against providers that bill per call.
pub const DEFAULT_HEALTH_CHECK_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub struct HealthResult {
    pub healthy: bool,
    pub cached: bool,
    pub status: String,
    pub error_message: Option<String>,
}

impl HealthResult {
    fn ok(status: impl Into<String>, cached: bool) -> Self {
        Self { healthy: true, cached, status: status.into(), error_message: None }
    }

    fn unhealthy(status: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            cached: false,
            status: status.into(),
            error_message: Some(error_message.into()),
        }
    }
}

/// Quick mode: `CheckInstantAvailability` against the candidate's info hash.
/// Some providers (RealDebrid) always answer "not cached" here; that is a
/// valid, healthy answer, not a failure.
pub async fn check_health_quick(
    provider: &dyn Provider,
    candidate: &ReleaseCandidate,
    cancellation: &CancellationToken,
) -> HealthResult {
    let Some(info_hash) = extract_info_hash(
        candidate
            .info_hash()
            .unwrap_or(&candidate.link),
    ) else {
        return HealthResult::unhealthy("unknown", "candidate carries no extractable info hash");
    };

    match provider.check_instant_availability(&info_hash, cancellation).await {
        Ok(true) => HealthResult::ok("cached", true),
        Ok(false) => HealthResult::ok("not cached", false),
        Err(e) => HealthResult::unhealthy("error", e.to_string()),
    }
}

/// Verifying mode: a full add+select+poll+delete cycle identical to the
/// arbitrator's `checkProviderCache`, except the torrent is always deleted at
/// the end regardless of outcome.
pub async fn check_health_verifying(
    client: &Client,
    provider: &dyn Provider,
    candidate: &ReleaseCandidate,
    hints: &SelectionHints,
    cancellation: &CancellationToken,
) -> HealthResult {
    let add = match register_candidate(client, provider, candidate, cancellation).await {
        Ok(add) => add,
        Err(e) => return HealthResult::unhealthy("error", e.to_string()),
    };

    let result = verify_added_torrent(provider, &add.id, hints, cancellation).await;
    let _ = provider.delete_torrent(&add.id, cancellation).await;
    result
}

async fn verify_added_torrent(
    provider: &dyn Provider,
    torrent_id: &str,
    hints: &SelectionHints,
    cancellation: &CancellationToken,
) -> HealthResult {
    let info = match provider.get_torrent_info(torrent_id, cancellation).await {
        Ok(info) => info,
        Err(e) => return HealthResult::unhealthy("error", e.to_string()),
    };

    let selection = select_files(&info.files, hints);
    if selection.is_rejected() {
        return HealthResult::unhealthy("rejected", selection.rejection_reason);
    }

    if let Err(e) = provider.select_files(torrent_id, &selection.ordered_ids.join(","), cancellation).await {
        return HealthResult::unhealthy("error", e.to_string());
    }

    let info_after = match provider.get_torrent_info(torrent_id, cancellation).await {
        Ok(info) => info,
        Err(e) => return HealthResult::unhealthy("error", e.to_string()),
    };

    if info_after.status.is_cached() {
        HealthResult::ok("cached", true)
    } else {
        HealthResult::ok(format!("{:?}", info_after.status), false)
    }
}

/// Checks the first `limit` candidates (quick mode when an info hash is
/// extractable, otherwise skipped) against one provider, preserving input
/// order.
pub async fn check_health_batch(
    provider: Arc<dyn Provider>,
    candidates: &[ReleaseCandidate],
    limit: usize,
    cancellation: &CancellationToken,
) -> Vec<Option<HealthResult>> {
    let mut results = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        if index >= limit || cancellation.is_cancelled() {
            results.push(None);
            continue;
        }
        results.push(Some(check_health_quick(provider.as_ref(), candidate, cancellation).await));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::error::EngineResult as Result;
    use crate::debrid::provider::Configurable;
    use crate::debrid::types::{AddResult, ServiceType, TorrentFile, TorrentInfo, TorrentStatus, UnrestrictResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubProvider {
        instant_available: bool,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }
        async fn add_magnet(&self, _: &str, _: &CancellationToken) -> Result<AddResult> {
            Ok(AddResult { id: "1".into(), uri: "magnet:?xt=urn:btih:abc".into() })
        }
        async fn add_torrent_file(&self, _: &[u8], _: &str, _: &CancellationToken) -> Result<AddResult> {
            unimplemented!()
        }
        async fn get_torrent_info(&self, _: &str, _: &CancellationToken) -> Result<TorrentInfo> {
            Ok(TorrentInfo {
                id: "1".into(),
                filename: "Show.S01E01.mkv".into(),
                hash: "abc".into(),
                bytes: 100,
                status: TorrentStatus::Downloaded,
                files: vec![TorrentFile {
                    id: "1".into(),
                    path: "Show.S01E01.mkv".into(),
                    bytes: 100,
                    selected: true,
                }],
                links: vec!["https://cdn/x.mkv".into()],
            })
        }
        async fn select_files(&self, _: &str, _: &str, _: &CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn delete_torrent(&self, id: &str, _: &CancellationToken) -> Result<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
        async fn unrestrict_link(&self, _: &str, _: &CancellationToken) -> Result<UnrestrictResult> {
            unimplemented!()
        }
        async fn check_instant_availability(&self, _: &str, _: &CancellationToken) -> Result<bool> {
            Ok(self.instant_available)
        }
    }

    impl Configurable for StubProvider {
        fn configure(&mut self, _: &HashMap<String, String>) {}
    }

    fn candidate() -> ReleaseCandidate {
        ReleaseCandidate {
            title: "Show S01E01".into(),
            link: "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567".into(),
            size_bytes: 0,
            service_type: ServiceType::Debrid,
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn quick_mode_reports_instant_availability() {
        let provider = StubProvider { instant_available: true, deleted: Mutex::new(vec![]) };
        let result = check_health_quick(&provider, &candidate(), &CancellationToken::new()).await;
        assert!(result.healthy);
        assert!(result.cached);
    }

    #[tokio::test]
    async fn quick_mode_not_cached_is_still_healthy() {
        let provider = StubProvider { instant_available: false, deleted: Mutex::new(vec![]) };
        let result = check_health_quick(&provider, &candidate(), &CancellationToken::new()).await;
        assert!(result.healthy);
        assert!(!result.cached);
    }

    #[test_log::test(tokio::test)]
    async fn verifying_mode_always_deletes() {
        let provider = StubProvider { instant_available: false, deleted: Mutex::new(vec![]) };
        let client = Client::new();
        let hints = SelectionHints::default();
        let result =
            check_health_verifying(&client, &provider, &candidate(), &hints, &CancellationToken::new()).await;
        assert!(result.cached);
        assert_eq!(provider.deleted.lock().unwrap().as_slice(), ["1"]);
    }
}
