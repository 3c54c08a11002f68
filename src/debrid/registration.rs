use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::drivers::http_util::MAX_TORRENT_FILE_BYTES;
use super::error::{EngineError, EngineResult};
use super::provider::Provider;
use super::types::{AddResult, ReleaseCandidate};

/// Registers a release candidate with a provider: directly via magnet, or by
/// downloading the `.torrent` file first and uploading its bytes.
///
/// Shared by the resolver (§4.6 step 3) and the multi-provider arbitrator's
/// per-provider cache check (§4.5 `checkProviderCache` step 1) so the
/// download/validation rules live in exactly one place.
pub async fn register_candidate(
    client: &Client,
    provider: &dyn Provider,
    candidate: &ReleaseCandidate,
    cancellation: &CancellationToken,
) -> EngineResult<AddResult> {
    if candidate.is_magnet() {
        return provider.add_magnet(&candidate.link, cancellation).await;
    }
    let url = candidate
        .torrent_url()
        .map(str::to_string)
        .unwrap_or_else(|| candidate.link.clone());
    if url.is_empty() {
        return Err(EngineError::configuration(
            "release candidate carries neither a magnet uri nor a torrent url",
        ));
    }
    let (bytes, filename) = download_torrent_file(client, &url, cancellation).await?;
    provider.add_torrent_file(&bytes, &filename, cancellation).await
}

async fn download_torrent_file(
    client: &Client,
    url: &str,
    cancellation: &CancellationToken,
) -> EngineResult<(Vec<u8>, String)> {
    let response = tokio::select! {
        biased;
        _ = cancellation.cancelled() => return Err(EngineError::internal("request cancelled")),
        result = client.get(url).send() => result?,
    };
    if !response.status().is_success() {
        return Err(EngineError::internal(format!(
            "torrent file download responded with status {}",
            response.status()
        )));
    }
    let filename = content_disposition_filename(&response).unwrap_or_else(|| url_path_filename(url));

    let body = response.bytes().await?;
    let capped = if body.len() as u64 > MAX_TORRENT_FILE_BYTES {
        body.slice(0..MAX_TORRENT_FILE_BYTES as usize)
    } else {
        body
    };

    if capped.len() < 10 {
        return Err(EngineError::internal("torrent file body is smaller than 10 bytes"));
    }
    if capped[0] != b'd' {
        return Err(EngineError::internal(
            "torrent file does not start with a bencoded dictionary marker",
        ));
    }

    Ok((capped.to_vec(), filename))
}

fn content_disposition_filename(response: &reqwest::Response) -> Option<String> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
}

fn url_path_filename(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "release.torrent".to_string())
}
