use std::collections::HashSet;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::drivers::http_util::{ARCHIVE_EXTENSIONS, has_extension};
use super::error::{EngineError, EngineResult};
use super::magnet::extract_info_hash;
use super::provider::Provider;
use super::registration::register_candidate;
use super::registry::Registry;
use super::selection::select_files;
use super::types::{
    BatchEpisodeResult, BatchEpisodeTarget, HealthStatus, PlaybackResolution, ProviderSettings,
    ReleaseCandidate, SelectionHints, TorrentInfo,
};

/// Resolves a single release candidate to a playback URL.
///
/// `providers` is the enabled/disabled, priority-ordered provider list from
/// configuration; `hints` are built from the target episode/movie and the
/// query normalizer's output.
pub async fn resolve(
    client: &Client,
    providers: &[ProviderSettings],
    candidate: &ReleaseCandidate,
    hints: &SelectionHints,
    cancellation: &CancellationToken,
) -> EngineResult<PlaybackResolution> {
    if candidate.is_preresolved() {
        let stream_url = candidate
            .stream_url()
            .ok_or_else(|| EngineError::configuration("preresolved candidate is missing stream_url"))?
            .to_string();
        return Ok(PlaybackResolution {
            webdav_path: stream_url.clone(),
            health_status: HealthStatus::PreResolved,
            file_size: candidate.size_bytes,
            source_nzb_path: stream_url,
        });
    }

    require_locatable(candidate)?;
    let settings = pick_provider(providers, candidate)?;
    let provider = Registry::global().create(&settings.name, settings.api_key.clone(), &settings.options)?;
    let provider_name = provider.name();

    let add = register_candidate(client, provider.as_ref(), candidate, cancellation).await?;
    let torrent_id = add.id.clone();

    let info = match provider.get_torrent_info(&torrent_id, cancellation).await {
        Ok(info) => info,
        Err(e) => return rollback(provider.as_ref(), &torrent_id, e, cancellation).await,
    };

    let selection = select_files(&info.files, hints);
    if selection.is_rejected() {
        return rollback(
            provider.as_ref(),
            &torrent_id,
            EngineError::selection(selection.rejection_reason).with_provider(provider_name),
            cancellation,
        )
        .await;
    }

    if let Err(e) = provider.select_files(&torrent_id, &selection.ordered_ids.join(","), cancellation).await {
        return rollback(provider.as_ref(), &torrent_id, e, cancellation).await;
    }

    let info_after = match provider.get_torrent_info(&torrent_id, cancellation).await {
        Ok(info) => info,
        Err(e) => return rollback(provider.as_ref(), &torrent_id, e, cancellation).await,
    };

    if !info_after.status.is_cached() {
        return rollback(
            provider.as_ref(),
            &torrent_id,
            EngineError::not_cached("torrent not cached").with_provider(provider_name),
            cancellation,
        )
        .await;
    }

    if info_after.links.is_empty() {
        return rollback(
            provider.as_ref(),
            &torrent_id,
            EngineError::internal("provider returned no links for a cached torrent").with_provider(provider_name),
            cancellation,
        )
        .await;
    }

    let link_index = preferred_link_index(&info_after, &selection.preferred_id);
    let link = info_after.links[link_index].clone();

    if let Err(e) = verify_link(client, &link, cancellation).await {
        return rollback(provider.as_ref(), &torrent_id, e.with_provider(provider_name), cancellation).await;
    }

    let webdav_path = format!(
        "/debrid/{provider_name}/{torrent_id}/file/{}/{}",
        selection.preferred_id, selection.preferred_label
    );

    Ok(PlaybackResolution {
        webdav_path,
        health_status: HealthStatus::Cached,
        file_size: info_after.bytes,
        source_nzb_path: link,
    })
}

/// Resolves many episode targets against a single torrent, issuing exactly
/// one add and one `SelectFiles` call for the whole batch.
pub async fn resolve_batch(
    client: &Client,
    providers: &[ProviderSettings],
    candidate: &ReleaseCandidate,
    targets: &[BatchEpisodeTarget],
    cancellation: &CancellationToken,
) -> EngineResult<Vec<BatchEpisodeResult>> {
    if targets.is_empty() {
        return Err(EngineError::configuration("episode batch is empty"));
    }

    require_locatable(candidate)?;
    let settings = pick_provider(providers, candidate)?;
    let provider = Registry::global().create(&settings.name, settings.api_key.clone(), &settings.options)?;
    let provider_name = provider.name();

    let add = register_candidate(client, provider.as_ref(), candidate, cancellation).await?;
    let torrent_id = add.id.clone();

    let info = match provider.get_torrent_info(&torrent_id, cancellation).await {
        Ok(info) => info,
        Err(e) => {
            let _ = provider.delete_torrent(&torrent_id, cancellation).await;
            return Err(e);
        }
    };

    let mut per_target_selection = Vec::with_capacity(targets.len());
    for target in targets {
        let hints = SelectionHints {
            expected_season: Some(target.season_number),
            expected_episode: Some(target.episode_number),
            episode_code: Some(target.episode_code.clone()),
            is_movie: false,
            is_daily: false,
            target_air_date: None,
        };
        per_target_selection.push(select_files(&info.files, &hints));
    }

    let mut ordered_ids = Vec::new();
    let mut seen = HashSet::new();
    for selection in &per_target_selection {
        if selection.is_rejected() {
            continue;
        }
        for id in &selection.ordered_ids {
            if seen.insert(id.clone()) {
                ordered_ids.push(id.clone());
            }
        }
    }

    if ordered_ids.is_empty() {
        let err = EngineError::selection("no episode target matched any candidate file").with_provider(provider_name);
        let _ = provider.delete_torrent(&torrent_id, cancellation).await;
        return Err(err);
    }

    if let Err(e) = provider.select_files(&torrent_id, &ordered_ids.join(","), cancellation).await {
        let _ = provider.delete_torrent(&torrent_id, cancellation).await;
        return Err(e);
    }

    let info_after = match provider.get_torrent_info(&torrent_id, cancellation).await {
        Ok(info) => info,
        Err(e) => {
            let _ = provider.delete_torrent(&torrent_id, cancellation).await;
            return Err(e);
        }
    };

    if !info_after.status.is_cached() {
        let _ = provider.delete_torrent(&torrent_id, cancellation).await;
        return Err(EngineError::not_cached("torrent not cached").with_provider(provider_name));
    }

    if info_after.links.is_empty() {
        let _ = provider.delete_torrent(&torrent_id, cancellation).await;
        return Err(EngineError::internal("provider returned no links for a cached torrent").with_provider(provider_name));
    }

    let mut verified_links = HashSet::new();
    let mut results = Vec::with_capacity(targets.len());
    for (target, selection) in targets.iter().zip(per_target_selection.iter()) {
        if selection.is_rejected() {
            results.push(BatchEpisodeResult {
                target: target.clone(),
                resolution: None,
                error: Some(selection.rejection_reason.clone()),
            });
            continue;
        }

        let link_index = preferred_link_index(&info_after, &selection.preferred_id);
        let link = info_after.links[link_index].clone();

        if verified_links.insert(link.clone()) {
            if let Err(e) = verify_link(client, &link, cancellation).await {
                results.push(BatchEpisodeResult {
                    target: target.clone(),
                    resolution: None,
                    error: Some(e.to_string()),
                });
                continue;
            }
        }

        let webdav_path = format!(
            "/debrid/{provider_name}/{torrent_id}/file/{}/{}",
            selection.preferred_id, selection.preferred_label
        );
        results.push(BatchEpisodeResult {
            target: target.clone(),
            resolution: Some(PlaybackResolution {
                webdav_path,
                health_status: HealthStatus::Cached,
                file_size: info_after.bytes,
                source_nzb_path: link,
            }),
            error: None,
        });
    }

    Ok(results)
}

fn require_locatable(candidate: &ReleaseCandidate) -> EngineResult<()> {
    if candidate.is_magnet() || candidate.torrent_url().is_some() {
        return Ok(());
    }
    if candidate.info_hash().and_then(extract_info_hash).is_some() {
        return Ok(());
    }
    Err(EngineError::configuration(
        "release candidate carries no magnet, torrent url, or info hash",
    ))
}

fn pick_provider<'a>(
    providers: &'a [ProviderSettings],
    candidate: &ReleaseCandidate,
) -> EngineResult<&'a ProviderSettings> {
    if let Some(name) = candidate.preferred_provider() {
        return providers
            .iter()
            .find(|p| p.enabled && p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineError::configuration(format!("requested provider '{name}' is not enabled")));
    }
    providers
        .iter()
        .find(|p| p.enabled)
        .ok_or_else(|| EngineError::configuration("no enabled debrid providers configured"))
}

/// Empirical mapping (see `TorrentInfo::selected_files_ascending`): `links[i]`
/// corresponds to the i-th selected file in ascending file-ID order.
fn preferred_link_index(info: &TorrentInfo, preferred_id: &str) -> usize {
    let selected = info.selected_files_ascending();
    match selected.iter().position(|f| f.id == preferred_id) {
        Some(index) if index < info.links.len() => index,
        _ => {
            tracing::warn!(
                preferred_id,
                "preferred file id not found among selected files; defaulting to link 0"
            );
            0
        }
    }
}

async fn verify_link(client: &Client, link: &str, cancellation: &CancellationToken) -> EngineResult<()> {
    if !link.starts_with("http://") && !link.starts_with("https://") {
        // Internal provider reference (e.g. Torbox `"id:id"`); resolved at stream time.
        return Ok(());
    }
    let parsed_path = reqwest::Url::parse(link).ok().map(|u| u.path().to_string()).unwrap_or_default();
    if has_extension(&parsed_path, ARCHIVE_EXTENSIONS) {
        return Err(EngineError::verification(format!("resolved link points at an archive file: {link}")));
    }
    let response = tokio::select! {
        biased;
        _ = cancellation.cancelled() => return Err(EngineError::internal("request cancelled")),
        result = client.head(link).send() => result?,
    };
    if response.status().as_u16() >= 400 {
        return Err(EngineError::verification(format!(
            "HEAD verification of resolved link failed with status {}",
            response.status()
        )));
    }
    Ok(())
}

async fn rollback<T>(
    provider: &dyn Provider,
    torrent_id: &str,
    err: EngineError,
    cancellation: &CancellationToken,
) -> EngineResult<T> {
    let _ = provider.delete_torrent(torrent_id, cancellation).await;
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::error::EngineResult as Result;
    use crate::debrid::provider::Configurable;
    use crate::debrid::types::{AddResult, ServiceType, TorrentFile, TorrentStatus, UnrestrictResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared state a factory closure captures so a test can inspect what a
    /// `PackProvider` it never directly holds (the registry owns it) actually did.
    #[derive(Default)]
    struct PackProviderCalls {
        select_calls: AtomicUsize,
        info_calls: AtomicUsize,
        deleted: Mutex<Vec<String>>,
    }

    struct PackProvider {
        calls: Arc<PackProviderCalls>,
        partial_pack: bool,
        status: TorrentStatus,
    }

    impl PackProvider {
        fn files(&self) -> Vec<TorrentFile> {
            let mut files = vec![
                TorrentFile { id: "1".into(), path: "Show.S01E01.mkv".into(), bytes: 100, selected: true },
                TorrentFile { id: "2".into(), path: "Show.S01E02.mkv".into(), bytes: 100, selected: true },
            ];
            if !self.partial_pack {
                files.push(TorrentFile { id: "3".into(), path: "Show.S01E03.mkv".into(), bytes: 100, selected: true });
            }
            files
        }
    }

    #[async_trait]
    impl Provider for PackProvider {
        fn name(&self) -> &'static str {
            "fakepack"
        }
        async fn add_magnet(&self, _: &str, _: &CancellationToken) -> Result<AddResult> {
            Ok(AddResult { id: "77".into(), uri: String::new() })
        }
        async fn add_torrent_file(&self, _: &[u8], _: &str, _: &CancellationToken) -> Result<AddResult> {
            unimplemented!()
        }
        async fn get_torrent_info(&self, _: &str, _: &CancellationToken) -> Result<TorrentInfo> {
            self.calls.info_calls.fetch_add(1, Ordering::SeqCst);
            let files = self.files();
            let links = (1..=files.len()).map(|i| format!("fakepack:{i}")).collect();
            Ok(TorrentInfo {
                id: "77".into(),
                filename: "Pack".into(),
                hash: "abc".into(),
                bytes: 300,
                status: self.status.clone(),
                files,
                links,
            })
        }
        async fn select_files(&self, _: &str, _: &str, _: &CancellationToken) -> Result<()> {
            self.calls.select_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn delete_torrent(&self, id: &str, _: &CancellationToken) -> Result<()> {
            self.calls.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
        async fn unrestrict_link(&self, _: &str, _: &CancellationToken) -> Result<UnrestrictResult> {
            unimplemented!()
        }
        async fn check_instant_availability(&self, _: &str, _: &CancellationToken) -> Result<bool> {
            unimplemented!()
        }
    }

    impl Configurable for PackProvider {
        fn configure(&mut self, _: &HashMap<String, String>) {}
    }

    fn target(season: u32, episode: u32, code: &str) -> BatchEpisodeTarget {
        BatchEpisodeTarget { season_number: season, episode_number: episode, episode_code: code.into() }
    }

    fn magnet_candidate() -> ReleaseCandidate {
        ReleaseCandidate {
            title: "Show S01".into(),
            link: "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567".into(),
            size_bytes: 0,
            service_type: ServiceType::Debrid,
            attributes: HashMap::new(),
        }
    }

    fn enabled_settings(name: &str) -> ProviderSettings {
        ProviderSettings { name: name.into(), api_key: "key".into(), enabled: true, priority: 0, options: HashMap::new() }
    }

    #[test]
    fn preresolved_candidates_carry_stream_url_verbatim() {
        let mut attributes = HashMap::new();
        attributes.insert("preresolved".to_string(), "true".to_string());
        attributes.insert("stream_url".to_string(), "https://cdn/x.mkv".to_string());
        let candidate = ReleaseCandidate {
            title: "x".into(),
            link: String::new(),
            size_bytes: 42,
            service_type: ServiceType::Debrid,
            attributes,
        };
        assert!(candidate.is_preresolved());
        assert_eq!(candidate.stream_url(), Some("https://cdn/x.mkv"));
    }

    #[test]
    fn rejects_candidate_with_no_locator() {
        let candidate = ReleaseCandidate {
            title: "x".into(),
            link: String::new(),
            size_bytes: 0,
            service_type: ServiceType::Debrid,
            attributes: HashMap::new(),
        };
        assert!(require_locatable(&candidate).is_err());
    }

    #[tokio::test]
    async fn preresolved_pass_through_skips_provider_lookup() {
        let mut attributes = HashMap::new();
        attributes.insert("preresolved".to_string(), "true".to_string());
        attributes.insert("stream_url".to_string(), "https://cdn/x.mkv".to_string());
        let candidate = ReleaseCandidate {
            title: "x".into(),
            link: String::new(),
            size_bytes: 42,
            service_type: ServiceType::Debrid,
            attributes,
        };
        let client = Client::new();
        let resolution = resolve(&client, &[], &candidate, &SelectionHints::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.webdav_path, "https://cdn/x.mkv");
        assert_eq!(resolution.health_status, HealthStatus::PreResolved);
    }

    #[tokio::test]
    async fn batch_happy_path_issues_one_select_call_per_target_order() {
        Registry::global().register("fakepack-batch-ok", |_key, _opts| {
            Box::new(PackProvider {
                calls: Arc::new(PackProviderCalls::default()),
                partial_pack: false,
                status: TorrentStatus::Downloaded,
            })
        });
        let client = Client::new();
        let providers = vec![enabled_settings("fakepack-batch-ok")];
        let candidate = magnet_candidate();
        let targets = vec![target(1, 1, "S01E01"), target(1, 2, "S01E02"), target(1, 3, "S01E03")];

        let results = resolve_batch(&client, &providers, &candidate, &targets, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.resolution.is_some() && r.error.is_none()));
        assert!(results[0].resolution.as_ref().unwrap().webdav_path.contains("/file/1/"));
        assert!(results[2].resolution.as_ref().unwrap().webdav_path.contains("/file/3/"));
    }

    #[tokio::test]
    async fn batch_partial_failure_reports_per_episode_error() {
        Registry::global().register("fakepack-batch-partial", |_key, _opts| {
            Box::new(PackProvider {
                calls: Arc::new(PackProviderCalls::default()),
                partial_pack: true,
                status: TorrentStatus::Downloaded,
            })
        });
        let client = Client::new();
        let providers = vec![enabled_settings("fakepack-batch-partial")];
        let candidate = magnet_candidate();
        let targets = vec![target(1, 1, "S01E01"), target(1, 2, "S01E02"), target(1, 3, "S01E03")];

        let results = resolve_batch(&client, &providers, &candidate, &targets, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].resolution.is_some());
        assert!(results[1].resolution.is_some());
        assert!(results[2].resolution.is_none());
        assert!(results[2].error.is_some());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_before_any_provider_call() {
        let client = Client::new();
        let providers = vec![enabled_settings("fakepack-batch-ok")];
        let candidate = magnet_candidate();
        let err = resolve_batch(&client, &providers, &candidate, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::debrid::error::EngineErrorKind::Configuration);
    }

    #[tokio::test]
    async fn not_cached_status_deletes_torrent_and_reports_error() {
        let calls = Arc::new(PackProviderCalls::default());
        {
            let calls = Arc::clone(&calls);
            Registry::global().register("fakepack-not-cached", move |_key, _opts| {
                Box::new(PackProvider {
                    calls: Arc::clone(&calls),
                    partial_pack: false,
                    status: TorrentStatus::Downloading,
                })
            });
        }
        let client = Client::new();
        let providers = vec![enabled_settings("fakepack-not-cached")];
        let candidate = magnet_candidate();
        let err = resolve(
            &client,
            &providers,
            &candidate,
            &SelectionHints { is_movie: true, ..Default::default() },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("not cached"));
        assert_eq!(calls.deleted.lock().unwrap().as_slice(), ["77"]);
    }
}
