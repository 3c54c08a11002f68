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

const BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

pub struct RealDebridProvider {
    api_key: String,
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl RealDebridProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client: Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
            retry: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    fn with_base_url(api_key: String, base_url: String) -> Self {
        Self { base_url, ..Self::new(api_key) }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_key)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        cancellation: &CancellationToken,
    ) -> EngineResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .retry
            .send(|| self.authed(self.client.get(&url)).send(), cancellation, is_transient_rd_body)
            .await?;
        decode_or_classify(response).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &HashMap<&str, &str>,
        cancellation: &CancellationToken,
    ) -> EngineResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .retry
            .send(
                || self.authed(self.client.post(&url)).form(form).send(),
                cancellation,
                is_transient_rd_body,
            )
            .await?;
        decode_or_classify(response).await
    }

    async fn delete_endpoint(&self, path: &str, cancellation: &CancellationToken) -> EngineResult<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .retry
            .send(|| self.authed(self.client.delete(&url)).send(), cancellation, is_transient_rd_body)
            .await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(classify_status(response).await)
    }
}

impl Configurable for RealDebridProvider {
    fn configure(&mut self, _options: &HashMap<String, String>) {}
}

/// RealDebrid error bodies look like `{"error": "...", "error_code": 19}`;
/// code 19 (`hoster_unavailable`) is the only one worth a retry cycle.
const TRANSIENT_RD_ERROR_CODES: &[u64] = &[19];

fn is_transient_rd_body(body: &str) -> bool {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    parsed
        .get("error_code")
        .and_then(Value::as_u64)
        .is_some_and(|code| TRANSIENT_RD_ERROR_CODES.contains(&code))
}

async fn decode_or_classify<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> EngineResult<T> {
    if !response.status().is_success() {
        return Err(classify_status(response).await);
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(EngineError::from)
}

async fn classify_status(response: reqwest::Response) -> EngineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            EngineError::authentication(format!("real-debrid responded {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            EngineError::transient(format!("real-debrid responded {status}: {body}"))
        }
        _ => EngineError::internal(format!("real-debrid responded {status}: {body}")),
    };
    err.with_provider("realdebrid")
}

#[derive(Debug, Deserialize)]
struct RdAddResponse {
    id: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct RdFile {
    id: u64,
    path: String,
    bytes: u64,
    selected: u64,
}

#[derive(Debug, Deserialize)]
struct RdTorrentInfo {
    id: String,
    filename: String,
    hash: String,
    bytes: u64,
    status: String,
    files: Vec<RdFile>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RdUnrestrictResponse {
    id: String,
    filename: String,
    filesize: u64,
    download: String,
    #[serde(default)]
    mime_type: Option<String>,
}

/// `{hash: {"rd": [{file_id: {filename, filesize}}, ...]}}`
type RdVariant = HashMap<String, serde_json::Value>;
type RdHostAvailability = HashMap<String, Vec<RdVariant>>;
type RdInstantAvailability = HashMap<String, RdHostAvailability>;

#[async_trait]
impl Provider for RealDebridProvider {
    fn name(&self) -> &'static str {
        "realdebrid"
    }

    async fn add_magnet(&self, magnet_uri: &str, cancellation: &CancellationToken) -> EngineResult<AddResult> {
        let mut form = HashMap::new();
        form.insert("magnet", magnet_uri);
        let response: RdAddResponse = self.post_form("/torrents/addMagnet", &form, cancellation).await?;
        Ok(AddResult { id: response.id, uri: response.uri })
    }

    async fn add_torrent_file(
        &self,
        data: &[u8],
        _filename_hint: &str,
        cancellation: &CancellationToken,
    ) -> EngineResult<AddResult> {
        let url = format!("{}/torrents/addTorrent", self.base_url);
        let response = self
            .retry
            .send(
                || {
                    self.authed(self.client.put(&url))
                        .header("Content-Type", "application/x-bittorrent")
                        .body(data.to_vec())
                        .send()
                },
                cancellation,
                is_transient_rd_body,
            )
            .await?;
        let result: RdAddResponse = decode_or_classify(response).await?;
        Ok(AddResult { id: result.id, uri: result.uri })
    }

    async fn get_torrent_info(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<TorrentInfo> {
        reject_invalid_id(id)?;
        let info: RdTorrentInfo = self.get(&format!("/torrents/info/{id}"), cancellation).await?;
        Ok(TorrentInfo {
            id: info.id,
            filename: info.filename,
            hash: info.hash,
            bytes: info.bytes,
            status: TorrentStatus::from_native(&info.status),
            files: info
                .files
                .into_iter()
                .map(|f| TorrentFile {
                    id: f.id.to_string(),
                    path: f.path,
                    bytes: f.bytes,
                    selected: f.selected != 0,
                })
                .collect(),
            links: info.links,
        })
    }

    /// RealDebrid uses 1-based file IDs already; `file_ids` is forwarded verbatim,
    /// `"all"` selects every file.
    async fn select_files(&self, id: &str, file_ids: &str, cancellation: &CancellationToken) -> EngineResult<()> {
        reject_invalid_id(id)?;
        let mut form = HashMap::new();
        form.insert("files", file_ids);
        let _: Value = self
            .post_form(&format!("/torrents/selectFiles/{id}"), &form, cancellation)
            .await?;
        Ok(())
    }

    async fn delete_torrent(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<()> {
        reject_invalid_id(id)?;
        self.delete_endpoint(&format!("/torrents/delete/{id}"), cancellation).await
    }

    async fn unrestrict_link(&self, link: &str, cancellation: &CancellationToken) -> EngineResult<UnrestrictResult> {
        let mut form = HashMap::new();
        form.insert("link", link);
        let response: RdUnrestrictResponse = self.post_form("/unrestrict/link", &form, cancellation).await?;
        Ok(UnrestrictResult {
            id: response.id,
            filename: response.filename,
            mime_type: response.mime_type.unwrap_or_default(),
            filesize: response.filesize,
            download_url: response.download,
        })
    }

    async fn check_instant_availability(&self, info_hash: &str, cancellation: &CancellationToken) -> EngineResult<bool> {
        let hash_lower = info_hash.to_ascii_lowercase();
        let response: RdInstantAvailability = self
            .get(&format!("/torrents/instantAvailability/{hash_lower}"), cancellation)
            .await?;
        Ok(response
            .get(&hash_lower)
            .and_then(|hosts| hosts.get("rd"))
            .is_some_and(|variants| !variants.is_empty()))
    }
}

pub fn factory(api_key: String, options: &HashMap<String, String>) -> Box<dyn Provider> {
    let mut provider = RealDebridProvider::new(api_key);
    provider.configure(options);
    Box::new(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_torrent_info_shape() {
        let json = r#"{
            "id": "ABC123",
            "filename": "test.torrent",
            "hash": "abcdef1234567890",
            "bytes": 1073741824,
            "status": "downloading",
            "files": [{"id": 1, "path": "/movie.mkv", "bytes": 1000000000, "selected": 1}],
            "links": ["https://example.com/link1"]
        }"#;
        let parsed: RdTorrentInfo = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, "ABC123");
        assert_eq!(parsed.files[0].selected, 1);
        assert_eq!(parsed.links.len(), 1);
    }

    #[test]
    fn decodes_instant_availability_hit() {
        let json = r#"{
            "abcdef1234567890": {
                "rd": [{"1": {"filename": "movie.mkv", "filesize": 1073741824}}]
            }
        }"#;
        let parsed: RdInstantAvailability = serde_json::from_str(json).unwrap();
        let hosts = parsed.get("abcdef1234567890").unwrap();
        assert!(hosts.get("rd").is_some_and(|v| !v.is_empty()));
    }

    #[tokio::test]
    async fn get_torrent_info_over_http() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/torrents/info/77"))
            .and(header("authorization", "Bearer testkey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "77",
                "filename": "Show.S01E01.mkv",
                "hash": "abc",
                "bytes": 100,
                "status": "downloaded",
                "files": [{"id": 1, "path": "/Show.S01E01.mkv", "bytes": 100, "selected": 1}],
                "links": ["https://cdn.example/x.mkv"]
            })))
            .mount(&server)
            .await;

        let provider = RealDebridProvider::with_base_url("testkey".into(), server.uri());
        let info = provider.get_torrent_info("77", &CancellationToken::new()).await.unwrap();
        assert_eq!(info.id, "77");
        assert!(info.status.is_cached());
    }

    #[tokio::test]
    async fn unauthorized_response_classifies_as_authentication_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/torrents/info/77"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let provider = RealDebridProvider::with_base_url("badkey".into(), server.uri());
        let err = provider.get_torrent_info("77", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, crate::debrid::error::EngineErrorKind::Authentication);
    }

    #[test]
    fn transient_body_requires_recognized_error_code() {
        assert!(is_transient_rd_body(r#"{"error": "hoster unavailable", "error_code": 19}"#));
        assert!(!is_transient_rd_body(r#"{"error": "bad request", "error_code": 1}"#));
        assert!(!is_transient_rd_body("not json"));
    }
}
