use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{EngineError, EngineResult};
use super::provider::Provider;
use super::registration::register_candidate;
use super::selection::select_files;
use super::types::{ReleaseCandidate, SelectionHints};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationMode {
    Fastest,
    Preferred,
}

/// One enabled provider entry the arbitrator dispatches a cache check to.
pub struct ArbitratedProvider {
    pub name: String,
    pub priority: u32,
    pub provider: Arc<dyn Provider>,
}

/// The provider the arbitrator settled on, with the torrent it left in place
/// for the resolver to finish mapping to a playback link.
pub struct ArbitrationWinner {
    pub provider_name: String,
    pub torrent_id: String,
}

struct CacheCheckOutcome {
    provider_name: String,
    priority: u32,
    provider: Arc<dyn Provider>,
    cached: bool,
    torrent_id: Option<String>,
    error: Option<EngineError>,
}

/// `checkProviderCache`: add, fetch info, select, re-fetch info, and judge
/// cache status, deleting the torrent on every path except "cached and kept
/// for the caller to decide" (handled by the caller, not here).
async fn check_provider_cache(
    client: &Client,
    provider: Arc<dyn Provider>,
    provider_name: &str,
    priority: u32,
    candidate: &ReleaseCandidate,
    hints: &SelectionHints,
    cancellation: &CancellationToken,
) -> CacheCheckOutcome {
    let miss = |torrent_id: Option<String>, error: Option<EngineError>| CacheCheckOutcome {
        provider_name: provider_name.to_string(),
        priority,
        provider: Arc::clone(&provider),
        cached: false,
        torrent_id,
        error,
    };

    let add = match register_candidate(client, provider.as_ref(), candidate, cancellation).await {
        Ok(add) => add,
        Err(e) => return miss(None, Some(e)),
    };

    if cancellation.is_cancelled() {
        let _ = provider.delete_torrent(&add.id, cancellation).await;
        return miss(None, Some(EngineError::internal("cancelled").with_provider(provider_name)));
    }

    let info = match provider.get_torrent_info(&add.id, cancellation).await {
        Ok(info) => info,
        Err(e) => {
            let _ = provider.delete_torrent(&add.id, cancellation).await;
            return miss(None, Some(e));
        }
    };

    let selection = select_files(&info.files, hints);
    if selection.is_rejected() {
        let _ = provider.delete_torrent(&add.id, cancellation).await;
        return miss(
            None,
            Some(EngineError::selection(selection.rejection_reason).with_provider(provider_name)),
        );
    }

    if cancellation.is_cancelled() {
        let _ = provider.delete_torrent(&add.id, cancellation).await;
        return miss(None, Some(EngineError::internal("cancelled").with_provider(provider_name)));
    }

    if let Err(e) = provider.select_files(&add.id, &selection.ordered_ids.join(","), cancellation).await {
        let _ = provider.delete_torrent(&add.id, cancellation).await;
        return miss(None, Some(e));
    }

    let info_after = match provider.get_torrent_info(&add.id, cancellation).await {
        Ok(info) => info,
        Err(e) => {
            let _ = provider.delete_torrent(&add.id, cancellation).await;
            return miss(None, Some(e));
        }
    };

    if !info_after.status.is_cached() {
        let _ = provider.delete_torrent(&add.id, cancellation).await;
        return miss(None, None);
    }

    CacheCheckOutcome {
        provider_name: provider_name.to_string(),
        priority,
        provider: Arc::clone(&provider),
        cached: true,
        torrent_id: Some(add.id),
        error: None,
    }
}

/// Runs the multi-provider cache check across every enabled provider and
/// returns the winner, per `mode`.
pub async fn arbitrate(
    client: &Client,
    providers: Vec<ArbitratedProvider>,
    candidate: &ReleaseCandidate,
    hints: &SelectionHints,
    mode: ArbitrationMode,
) -> EngineResult<ArbitrationWinner> {
    if providers.is_empty() {
        return Err(EngineError::configuration("no enabled debrid providers configured"));
    }

    match mode {
        ArbitrationMode::Fastest => arbitrate_fastest(client, providers, candidate, hints).await,
        ArbitrationMode::Preferred => arbitrate_preferred(client, providers, candidate, hints).await,
    }
}

async fn arbitrate_fastest(
    client: &Client,
    providers: Vec<ArbitratedProvider>,
    candidate: &ReleaseCandidate,
    hints: &SelectionHints,
) -> EngineResult<ArbitrationWinner> {
    let cancellation = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(providers.len().max(1));

    for entry in providers {
        let client = client.clone();
        let candidate = candidate.clone();
        let hints = hints.clone();
        let cancellation = cancellation.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = check_provider_cache(
                &client,
                Arc::clone(&entry.provider),
                &entry.name,
                entry.priority,
                &candidate,
                &hints,
                &cancellation,
            )
            .await;
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    let mut first_error = None;
    while let Some(outcome) = rx.recv().await {
        if outcome.cached {
            cancellation.cancel();
            return Ok(ArbitrationWinner {
                provider_name: outcome.provider_name,
                torrent_id: outcome.torrent_id.expect("cached outcome always carries a torrent id"),
            });
        }
        if first_error.is_none() {
            first_error = outcome.error;
        }
    }

    Err(aggregate_not_cached_error(first_error))
}

async fn arbitrate_preferred(
    client: &Client,
    providers: Vec<ArbitratedProvider>,
    candidate: &ReleaseCandidate,
    hints: &SelectionHints,
) -> EngineResult<ArbitrationWinner> {
    let cancellation = CancellationToken::new();
    let mut handles = Vec::with_capacity(providers.len());
    for entry in providers {
        let client = client.clone();
        let candidate = candidate.clone();
        let hints = hints.clone();
        let cancellation = cancellation.clone();
        handles.push(tokio::spawn(async move {
            check_provider_cache(
                &client,
                Arc::clone(&entry.provider),
                &entry.name,
                entry.priority,
                &candidate,
                &hints,
                &cancellation,
            )
            .await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(outcome) = handle.await {
            outcomes.push(outcome);
        }
    }

    let mut first_error = None;
    let mut cached: Vec<CacheCheckOutcome> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        if outcome.cached {
            cached.push(outcome);
        } else if first_error.is_none() {
            first_error = outcome.error;
        }
    }
    if cached.is_empty() {
        return Err(aggregate_not_cached_error(first_error));
    }
    cached.sort_by_key(|o| o.priority);
    let mut winners = cached.into_iter();
    let winner = winners.next().expect("non-empty after is_empty check");

    // Every other cached torrent is a loser: delete it to avoid orphaning quota.
    for loser in winners {
        if let Some(torrent_id) = loser.torrent_id {
            if let Err(e) = loser.provider.delete_torrent(&torrent_id, &cancellation).await {
                tracing::warn!(
                    provider = loser.provider_name,
                    torrent_id,
                    error = %e,
                    "failed to delete non-winning cached torrent"
                );
            }
        }
    }

    Ok(ArbitrationWinner {
        provider_name: winner.provider_name,
        torrent_id: winner.torrent_id.expect("cached outcome always carries a torrent id"),
    })
}

fn aggregate_not_cached_error(first_error: Option<EngineError>) -> EngineError {
    match first_error {
        Some(e) => EngineError::not_cached(format!("not cached on any enabled provider: {e}")),
        None => EngineError::not_cached("not cached on any enabled provider"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::debrid::error::EngineResult;
    use crate::debrid::types::{AddResult, ServiceType, TorrentFile, TorrentInfo, TorrentStatus, UnrestrictResult};

    /// A provider that either reports cached immediately or after a delay,
    /// recording every `delete_torrent` call it receives.
    struct StubProvider {
        name: &'static str,
        cached: bool,
        delay: Duration,
        deleted: Mutex<Vec<String>>,
    }

    impl StubProvider {
        fn new(name: &'static str, cached: bool) -> Self {
            Self { name, cached, delay: Duration::ZERO, deleted: Mutex::new(Vec::new()) }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn add_magnet(&self, magnet_uri: &str, _cancellation: &CancellationToken) -> EngineResult<AddResult> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(AddResult { id: format!("{}-torrent", self.name), uri: magnet_uri.to_string() })
        }

        async fn add_torrent_file(
            &self,
            _data: &[u8],
            _filename_hint: &str,
            _cancellation: &CancellationToken,
        ) -> EngineResult<AddResult> {
            unreachable!("arbitrator tests only exercise the magnet path")
        }

        async fn get_torrent_info(&self, id: &str, _cancellation: &CancellationToken) -> EngineResult<TorrentInfo> {
            Ok(TorrentInfo {
                id: id.to_string(),
                filename: "pack".into(),
                hash: "abc".into(),
                bytes: 0,
                status: if self.cached { TorrentStatus::Downloaded } else { TorrentStatus::Queued },
                files: vec![TorrentFile { id: "1".into(), path: "a.mkv".into(), bytes: 1, selected: true }],
                links: vec!["https://cdn.example/a.mkv".into()],
            })
        }

        async fn select_files(&self, _id: &str, _file_ids: &str, _cancellation: &CancellationToken) -> EngineResult<()> {
            Ok(())
        }

        async fn delete_torrent(&self, id: &str, _cancellation: &CancellationToken) -> EngineResult<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn unrestrict_link(&self, _link: &str, _cancellation: &CancellationToken) -> EngineResult<UnrestrictResult> {
            unreachable!("arbitrator tests don't resolve playback links")
        }

        async fn check_instant_availability(&self, _info_hash: &str, _cancellation: &CancellationToken) -> EngineResult<bool> {
            Ok(self.cached)
        }
    }

    fn magnet_candidate() -> ReleaseCandidate {
        ReleaseCandidate {
            title: "Show S01E01".into(),
            link: "magnet:?xt=urn:btih:abcdef1234567890".into(),
            size_bytes: 0,
            service_type: ServiceType::Debrid,
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn fastest_mode_returns_first_cached_provider() {
        let slow_provider = Arc::new(StubProvider::new("slow", false).with_delay(Duration::from_millis(50)));
        let slow = ArbitratedProvider {
            name: "slow".into(),
            priority: 0,
            provider: Arc::clone(&slow_provider) as Arc<dyn Provider>,
        };
        let fast = ArbitratedProvider {
            name: "fast".into(),
            priority: 1,
            provider: Arc::new(StubProvider::new("fast", true)),
        };

        let winner = arbitrate(
            &Client::new(),
            vec![slow, fast],
            &magnet_candidate(),
            &SelectionHints::default(),
            ArbitrationMode::Fastest,
        )
        .await
        .unwrap();

        assert_eq!(winner.provider_name, "fast");
        assert_eq!(winner.torrent_id, "fast-torrent");
        assert_eq!(slow_provider.deleted.lock().unwrap().as_slice(), ["slow-torrent"]);
    }

    #[tokio::test]
    async fn fastest_mode_errors_when_nothing_is_cached() {
        let providers = vec![ArbitratedProvider {
            name: "miss".into(),
            priority: 0,
            provider: Arc::new(StubProvider::new("miss", false)),
        }];

        let err = arbitrate(
            &Client::new(),
            providers,
            &magnet_candidate(),
            &SelectionHints::default(),
            ArbitrationMode::Fastest,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, crate::debrid::error::EngineErrorKind::NotCached);
    }

    #[tokio::test]
    async fn preferred_mode_picks_lowest_priority_and_deletes_the_loser() {
        let a = Arc::new(StubProvider::new("a", true));
        let b = Arc::new(StubProvider::new("b", true));
        let providers = vec![
            ArbitratedProvider { name: "a".into(), priority: 5, provider: Arc::clone(&a) as Arc<dyn Provider> },
            ArbitratedProvider { name: "b".into(), priority: 1, provider: Arc::clone(&b) as Arc<dyn Provider> },
        ];

        let winner = arbitrate(
            &Client::new(),
            providers,
            &magnet_candidate(),
            &SelectionHints::default(),
            ArbitrationMode::Preferred,
        )
        .await
        .unwrap();

        assert_eq!(winner.provider_name, "b");
        assert_eq!(winner.torrent_id, "b-torrent");
        assert_eq!(a.deleted.lock().unwrap().as_slice(), ["a-torrent"]);
        assert!(b.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_provider_list_is_rejected() {
        let err = arbitrate(
            &Client::new(),
            vec![],
            &magnet_candidate(),
            &SelectionHints::default(),
            ArbitrationMode::Fastest,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, crate::debrid::error::EngineErrorKind::Configuration);
    }
}
