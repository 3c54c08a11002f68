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

const BASE_URL: &str = "https://api.torbox.app/v1/api";

pub struct TorboxProvider {
    api_key: String,
    client: Client,
    retry: RetryPolicy,
    auto_clear_queue: bool,
}

impl TorboxProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .timeout(DEFAULT_REQUEST_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
            retry: RetryPolicy::default(),
            auto_clear_queue: false,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_key)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        cancellation: &CancellationToken,
    ) -> EngineResult<T> {
        let url = format!("{BASE_URL}{path}");
        let response = self
            .retry
            .send(|| self.authed(self.client.get(&url)).send(), cancellation, |_| true)
            .await?;
        decode_envelope(response).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &HashMap<&str, &str>,
        cancellation: &CancellationToken,
    ) -> EngineResult<T> {
        let url = format!("{BASE_URL}{path}");
        let response = self
            .retry
            .send(
                || self.authed(self.client.post(&url)).form(form).send(),
                cancellation,
                |_| true,
            )
            .await?;
        decode_envelope(response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        cancellation: &CancellationToken,
    ) -> EngineResult<T> {
        let url = format!("{BASE_URL}{path}");
        let response = self
            .retry
            .send(
                || self.authed(self.client.post(&url)).json(body).send(),
                cancellation,
                |_| true,
            )
            .await?;
        decode_envelope(response).await
    }

    /// Lists all of this account's torrents and deletes every one not in a
    /// cached/completed state, so a subsequent add can claim a queue slot.
    async fn clear_non_cached_queue(&self, cancellation: &CancellationToken) -> EngineResult<()> {
        let listed: OneOrMany<TorboxTorrent> = self.get("/torrents/mylist", cancellation).await?;
        for torrent in listed.into_vec() {
            let status = TorrentStatus::from_native(&torrent.download_state.unwrap_or_default());
            if !status.is_cached() {
                let _ = self.delete_torrent(&torrent.id.to_string(), cancellation).await;
            }
        }
        Ok(())
    }
}

impl Configurable for TorboxProvider {
    fn configure(&mut self, options: &HashMap<String, String>) {
        self.auto_clear_queue = options
            .get("autoClearQueue")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
    #[serde(skip)]
    None,
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(v) => vec![v],
            OneOrMany::None => vec![],
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::None
    }
}

/// Torbox envelopes every response as `{success, detail, data}`. This decodes
/// the envelope as a generic [`Value`] first so a missing/null `data` field on
/// an error response never fails deserialization before `success` is checked.
async fn decode_envelope<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> EngineResult<T> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).to_string();
        return Err(classify_torbox_status(status, &body));
    }
    let envelope: Value = serde_json::from_slice(&bytes)?;
    let success = envelope.get("success").and_then(Value::as_bool).unwrap_or(false);
    if !success {
        let detail = envelope
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or("unknown torbox error");
        return Err(classify_torbox_detail(detail));
    }
    let data = envelope.get("data").cloned().unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(EngineError::from)
}

fn classify_torbox_status(status: StatusCode, body: &str) -> EngineError {
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            EngineError::authentication(format!("torbox responded {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            EngineError::transient(format!("torbox responded {status}: {body}"))
        }
        _ if body.contains("ACTIVE_LIMIT") => EngineError::quota(body),
        _ => EngineError::internal(format!("torbox responded {status}: {body}")),
    };
    err.with_provider("torbox")
}

fn classify_torbox_detail(detail: &str) -> EngineError {
    let err = if detail.contains("ACTIVE_LIMIT") {
        EngineError::quota(detail)
    } else {
        EngineError::internal(detail)
    };
    err.with_provider("torbox")
}

#[derive(Debug, Deserialize, Clone)]
struct TorboxFile {
    id: i64,
    #[serde(alias = "short_name", alias = "name")]
    path: String,
    size: u64,
}

#[derive(Debug, Deserialize, Clone)]
struct TorboxTorrent {
    id: i64,
    hash: String,
    name: String,
    size: u64,
    #[serde(default)]
    download_state: Option<String>,
    #[serde(default)]
    files: Vec<TorboxFile>,
}

#[derive(Debug, Deserialize)]
struct TorboxAddResponse {
    torrent_id: i64,
}

/// Torbox's unrestrict ("request download link") endpoint returns either a
/// bare string URL or an object carrying it under `download` or `link`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TorboxUnrestrict {
    Direct(String),
    Wrapped {
        #[serde(alias = "link")]
        download: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        filesize: Option<u64>,
    },
}

#[async_trait]
impl Provider for TorboxProvider {
    fn name(&self) -> &'static str {
        "torbox"
    }

    async fn add_magnet(&self, magnet_uri: &str, cancellation: &CancellationToken) -> EngineResult<AddResult> {
        let mut form = HashMap::new();
        form.insert("magnet", magnet_uri);
        match self
            .post_form::<TorboxAddResponse>("/torrents/createtorrent", &form, cancellation)
            .await
        {
            Ok(data) => Ok(AddResult {
                id: data.torrent_id.to_string(),
                uri: magnet_uri.to_string(),
            }),
            Err(e) if e.kind == crate::debrid::error::EngineErrorKind::Quota && self.auto_clear_queue => {
                self.clear_non_cached_queue(cancellation).await?;
                let data: TorboxAddResponse =
                    self.post_form("/torrents/createtorrent", &form, cancellation).await?;
                Ok(AddResult {
                    id: data.torrent_id.to_string(),
                    uri: magnet_uri.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn add_torrent_file(
        &self,
        data: &[u8],
        filename_hint: &str,
        cancellation: &CancellationToken,
    ) -> EngineResult<AddResult> {
        let url = format!("{BASE_URL}/torrents/createtorrent");
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(filename_hint.to_string())
            .mime_str("application/x-bittorrent")
            .map_err(EngineError::from)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(EngineError::internal("request cancelled")),
            result = self.authed(self.client.post(&url)).multipart(form).send() => result?,
        };
        let parsed: TorboxAddResponse = decode_envelope(response).await?;
        Ok(AddResult {
            id: parsed.torrent_id.to_string(),
            uri: String::new(),
        })
    }

    async fn get_torrent_info(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<TorrentInfo> {
        reject_invalid_id(id)?;
        let listed: OneOrMany<TorboxTorrent> = self
            .get(&format!("/torrents/mylist?id={id}&bypass_cache=true"), cancellation)
            .await?;
        let torrent = listed
            .into_vec()
            .into_iter()
            .find(|t| t.id.to_string() == id)
            .ok_or_else(|| EngineError::internal(format!("torrent {id} not found in torbox list")).with_provider("torbox"))?;

        let status = TorrentStatus::from_native(&torrent.download_state.clone().unwrap_or_default());
        let files: Vec<TorrentFile> = torrent
            .files
            .iter()
            .map(|f| TorrentFile {
                id: f.id.to_string(),
                path: f.path.clone(),
                bytes: f.size,
                // Torbox auto-selects everything; there is no per-file selection state.
                selected: true,
            })
            .collect();
        let links = files
            .iter()
            .map(|f| format!("{}:{}", torrent.id, f.id))
            .collect();

        Ok(TorrentInfo {
            id: torrent.id.to_string(),
            filename: torrent.name,
            hash: torrent.hash,
            bytes: torrent.size,
            status,
            files,
            links,
        })
    }

    /// No-op: Torbox auto-selects every file in the torrent at add time.
    async fn select_files(&self, id: &str, _file_ids: &str, _cancellation: &CancellationToken) -> EngineResult<()> {
        reject_invalid_id(id)?;
        Ok(())
    }

    async fn delete_torrent(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<()> {
        reject_invalid_id(id)?;
        let body = serde_json::json!({ "torrent_id": id.parse::<i64>().unwrap_or(0), "operation": "delete" });
        let _: Value = self.post_json("/torrents/controltorrent", &body, cancellation).await?;
        Ok(())
    }

    /// `link` here is the internal `"{torrent_id}:{file_id}"` reference produced
    /// by [`Self::get_torrent_info`].
    async fn unrestrict_link(&self, link: &str, cancellation: &CancellationToken) -> EngineResult<UnrestrictResult> {
        let (torrent_id, file_id) = link
            .split_once(':')
            .ok_or_else(|| EngineError::internal(format!("malformed torbox link reference: {link}")))?;
        let url = format!(
            "{BASE_URL}/torrents/requestdl?token={}&torrent_id={torrent_id}&file_id={file_id}",
            self.api_key
        );
        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(EngineError::internal("request cancelled")),
            result = self.client.get(&url).send() => result?,
        };
        let parsed: TorboxUnrestrict = decode_envelope(response).await?;
        let (download_url, filename, filesize) = match parsed {
            TorboxUnrestrict::Direct(url) => (url, String::new(), 0),
            TorboxUnrestrict::Wrapped { download, filename, filesize } => {
                (download, filename.unwrap_or_default(), filesize.unwrap_or(0))
            }
        };
        Ok(UnrestrictResult {
            id: file_id.to_string(),
            filename,
            mime_type: String::new(),
            filesize,
            download_url,
        })
    }

    async fn check_instant_availability(&self, info_hash: &str, cancellation: &CancellationToken) -> EngineResult<bool> {
        let data: Value = self
            .get(&format!("/torrents/checkcached?hash={}&format=list", info_hash.to_ascii_lowercase()), cancellation)
            .await?;
        Ok(match data {
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Bool(b) => b,
            _ => false,
        })
    }
}

pub fn factory(api_key: String, options: &HashMap<String, String>) -> Box<dyn Provider> {
    let mut provider = TorboxProvider::new(api_key);
    provider.configure(options);
    Box::new(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_unrestrict_as_bare_string_or_wrapped_object() {
        let bare: TorboxUnrestrict = serde_json::from_str(r#""https://cdn/x.mkv""#).unwrap();
        assert!(matches!(bare, TorboxUnrestrict::Direct(ref s) if s == "https://cdn/x.mkv"));

        let wrapped: TorboxUnrestrict =
            serde_json::from_str(r#"{"download": "https://cdn/y.mkv", "filename": "y.mkv"}"#).unwrap();
        assert!(matches!(wrapped, TorboxUnrestrict::Wrapped { ref download, .. } if download == "https://cdn/y.mkv"));
    }

    #[test]
    fn decodes_mylist_as_object_or_array() {
        let one: OneOrMany<TorboxTorrent> = serde_json::from_str(
            r#"{"id": 1, "hash": "abc", "name": "pack", "size": 10, "files": []}"#,
        )
        .unwrap();
        assert_eq!(one.into_vec().len(), 1);

        let many: OneOrMany<TorboxTorrent> = serde_json::from_str(
            r#"[{"id": 1, "hash": "abc", "name": "pack", "size": 10, "files": []}]"#,
        )
        .unwrap();
        assert_eq!(many.into_vec().len(), 1);
    }

    #[test]
    fn quota_error_detected_by_substring() {
        let err = classify_torbox_detail("active download ACTIVE_LIMIT reached");
        assert_eq!(err.kind, crate::debrid::error::EngineErrorKind::Quota);
    }
}
