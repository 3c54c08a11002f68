use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::debrid::error::{EngineError, EngineResult};
use crate::debrid::provider::{Configurable, Provider, reject_invalid_id};
use crate::debrid::types::{AddResult, TorrentFile, TorrentInfo, TorrentStatus, UnrestrictResult};

use super::http_util::{DEFAULT_REQUEST_TIMEOUT, RetryPolicy};

const BASE_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "debrid-engine";

pub struct AllDebridProvider {
    api_key: String,
    client: Client,
    retry: RetryPolicy,
}

impl AllDebridProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
            retry: RetryPolicy::default(),
        }
    }

    /// AllDebrid authenticates via an `apikey` query-string parameter rather
    /// than an Authorization header, on every verb.
    fn request(&self, method: reqwest::Method, path: &str, extra: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let mut query = vec![("agent", AGENT), ("apikey", self.api_key.as_str())];
        query.extend_from_slice(extra);
        self.client.request(method, format!("{BASE_URL}{path}")).query(&query)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        extra: Vec<(String, String)>,
        cancellation: &CancellationToken,
    ) -> EngineResult<T> {
        let borrowed: Vec<(&str, &str)> = extra.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let response = self
            .retry
            .send(
                || self.request(method.clone(), path, &borrowed).send(),
                cancellation,
                |_| true,
            )
            .await?;
        decode_response(response).await
    }
}

impl Configurable for AllDebridProvider {
    fn configure(&mut self, _options: &HashMap<String, String>) {}
}

/// `{status: "success"|"error", data: {...}}` or, on error, `{status: "error", error: {code, message}}`.
async fn decode_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> EngineResult<T> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).to_string();
        return Err(classify_alldebrid_status(status, &body));
    }
    let envelope: Value = serde_json::from_slice(&bytes)?;
    let ok = envelope.get("status").and_then(Value::as_str) == Some("success");
    if !ok {
        let message = envelope
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown alldebrid error");
        return Err(classify_alldebrid_message(message));
    }
    let data = envelope.get("data").cloned().unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(EngineError::from)
}

fn classify_alldebrid_status(status: StatusCode, body: &str) -> EngineError {
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            EngineError::authentication(format!("alldebrid responded {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            EngineError::transient(format!("alldebrid responded {status}: {body}"))
        }
        _ => EngineError::internal(format!("alldebrid responded {status}: {body}")),
    };
    err.with_provider("alldebrid")
}

fn classify_alldebrid_message(message: &str) -> EngineError {
    let lower = message.to_ascii_lowercase();
    let err = if lower.contains("auth") {
        EngineError::authentication(message)
    } else {
        EngineError::internal(message)
    };
    err.with_provider("alldebrid")
}

#[derive(Debug, Deserialize)]
struct AdUploadMagnetsResponse {
    magnets: Vec<AdMagnetAck>,
}

#[derive(Debug, Deserialize)]
struct AdMagnetAck {
    id: i64,
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct AdMagnetStatusResponse {
    magnets: AdMagnetStatus,
}

#[derive(Debug, Deserialize)]
struct AdMagnetStatus {
    id: i64,
    filename: String,
    size: u64,
    hash: String,
    status: String,
    #[serde(default)]
    links: Vec<AdLink>,
}

#[derive(Debug, Deserialize)]
struct AdLink {
    link: String,
    filename: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct AdUnlockResponse {
    link: String,
    filename: String,
    filesize: u64,
    #[serde(default)]
    mimetype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdInstantResponse {
    magnets: Vec<AdInstantMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdInstantMagnet {
    #[serde(default)]
    instant: bool,
}

#[async_trait]
impl Provider for AllDebridProvider {
    fn name(&self) -> &'static str {
        "alldebrid"
    }

    async fn add_magnet(&self, magnet_uri: &str, cancellation: &CancellationToken) -> EngineResult<AddResult> {
        let response: AdUploadMagnetsResponse = self
            .call(
                reqwest::Method::GET,
                "/magnet/upload",
                vec![("magnets[]".to_string(), magnet_uri.to_string())],
                cancellation,
            )
            .await?;
        let ack = response
            .magnets
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::internal("alldebrid returned no magnet ack").with_provider("alldebrid"))?;
        Ok(AddResult { id: ack.id.to_string(), uri: magnet_uri.to_string() })
    }

    /// AllDebrid has no separate `.torrent` file upload endpoint in the
    /// magnet-centric v4 API; callers are expected to convert to a magnet
    /// URI upstream when this provider is selected.
    async fn add_torrent_file(
        &self,
        _data: &[u8],
        _filename_hint: &str,
        _cancellation: &CancellationToken,
    ) -> EngineResult<AddResult> {
        Err(EngineError::configuration("alldebrid does not support raw .torrent file uploads")
            .with_provider("alldebrid"))
    }

    async fn get_torrent_info(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<TorrentInfo> {
        reject_invalid_id(id)?;
        let response: AdMagnetStatusResponse = self
            .call(reqwest::Method::GET, "/magnet/status", vec![("id".to_string(), id.to_string())], cancellation)
            .await?;
        let m = response.magnets;
        let status = TorrentStatus::from_native(&m.status);
        let files: Vec<TorrentFile> = m
            .links
            .iter()
            .enumerate()
            .map(|(idx, link)| TorrentFile {
                id: idx.to_string(),
                path: link.filename.clone(),
                bytes: link.size,
                selected: true,
            })
            .collect();
        let links = m.links.into_iter().map(|l| l.link).collect();
        Ok(TorrentInfo {
            id: m.id.to_string(),
            filename: m.filename,
            hash: m.hash,
            bytes: m.size,
            status,
            files,
            links,
        })
    }

    /// AllDebrid has no selection endpoint; every file in the magnet is
    /// already enumerable via `links`.
    async fn select_files(&self, id: &str, _file_ids: &str, _cancellation: &CancellationToken) -> EngineResult<()> {
        reject_invalid_id(id)?;
        Ok(())
    }

    async fn delete_torrent(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<()> {
        reject_invalid_id(id)?;
        let _: Value = self
            .call(reqwest::Method::GET, "/magnet/delete", vec![("id".to_string(), id.to_string())], cancellation)
            .await?;
        Ok(())
    }

    async fn unrestrict_link(&self, link: &str, cancellation: &CancellationToken) -> EngineResult<UnrestrictResult> {
        let response: AdUnlockResponse = self
            .call(reqwest::Method::GET, "/link/unlock", vec![("link".to_string(), link.to_string())], cancellation)
            .await?;
        Ok(UnrestrictResult {
            id: link.to_string(),
            filename: response.filename,
            mime_type: response.mimetype.unwrap_or_default(),
            filesize: response.filesize,
            download_url: response.link,
        })
    }

    async fn check_instant_availability(&self, info_hash: &str, cancellation: &CancellationToken) -> EngineResult<bool> {
        let response: AdInstantResponse = self
            .call(
                reqwest::Method::GET,
                "/magnet/instant",
                vec![("magnets[]".to_string(), info_hash.to_string())],
                cancellation,
            )
            .await?;
        Ok(response.magnets.first().is_some_and(|m| m.instant))
    }
}

pub fn factory(api_key: String, options: &HashMap<String, String>) -> Box<dyn Provider> {
    let mut provider = AllDebridProvider::new(api_key);
    provider.configure(options);
    Box::new(provider)
}
