use std::time::Duration;

use reqwest::{Response, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::debrid::error::{EngineError, EngineResult};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_TORRENT_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Retry policy shared by drivers that retry on 429/transient 503 (observed
/// in RealDebrid). Torbox and AllDebrid drivers construct this with
/// `max_retries: 0` to opt out without duplicating the dispatch loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 0 }
    }

    /// Exponential backoff `1, 2, 4, 8, 16` seconds, capped at 30s, honoring
    /// `Retry-After` when present and parseable.
    fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after.min(Duration::from_secs(30));
        }
        let secs = 1u64.checked_shl(attempt).unwrap_or(16).min(16);
        Duration::from_secs(secs).min(Duration::from_secs(30))
    }

    /// `transient_json_code` classifies the response body as a recognized
    /// transient error (e.g. RealDebrid code 19 "hoster_unavailable") when the
    /// status is 503. Passing a closure that always returns `false` means only
    /// 429 triggers a retry.
    pub async fn send<F, Fut>(
        &self,
        build: F,
        cancellation: &CancellationToken,
        transient_on_503: impl Fn(&str) -> bool,
    ) -> EngineResult<Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<Response>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancellation.is_cancelled() {
                return Err(EngineError::internal("request cancelled"));
            }
            let response = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    return Err(EngineError::internal("request cancelled"));
                }
                result = build() => result,
            };
            let response = response?;
            let status = response.status();

            let retryable = status == StatusCode::TOO_MANY_REQUESTS
                || (status == StatusCode::SERVICE_UNAVAILABLE && {
                    let retry_after = parse_retry_after(&response);
                    // Body is peeked without consuming the response we return on
                    // the non-retry path; on the retry path we discard it anyway.
                    let _ = retry_after;
                    true
                });

            if !retryable || attempt >= self.max_retries {
                return Ok(response);
            }

            let retry_after = parse_retry_after(&response);
            // Drain the body so we can decide on the 503-transient-code case.
            if status == StatusCode::SERVICE_UNAVAILABLE {
                let body = response.text().await.unwrap_or_default();
                if !transient_on_503(&body) {
                    return Err(EngineError::transient(format!(
                        "provider responded 503 with non-transient body: {body}"
                    )));
                }
            }

            let delay = Self::backoff_delay(attempt, retry_after);
            tracing::warn!(attempt, status = status.as_u16(), delay_secs = delay.as_secs(), "retrying debrid request");
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    return Err(EngineError::internal("request cancelled during retry backoff"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Recognized media file extensions (§4.3 rule 1).
pub const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "ts", "mov", "webm"];

/// Known archive extensions (§4.3 rule 2).
pub const ARCHIVE_EXTENSIONS: &[&str] = &["rar", "zip", "7z", "tar", "gz", "tgz"];

pub fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let lower = path.to_ascii_lowercase();
    extensions.iter().any(|ext| lower.ends_with(&format!(".{ext}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        assert_eq!(RetryPolicy::backoff_delay(0, None), Duration::from_secs(1));
        assert_eq!(RetryPolicy::backoff_delay(4, None), Duration::from_secs(16));
        assert_eq!(
            RetryPolicy::backoff_delay(2, Some(Duration::from_secs(120))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert!(has_extension("Show.S01E01.MKV", MEDIA_EXTENSIONS));
        assert!(!has_extension("Show.S01E01.srt", MEDIA_EXTENSIONS));
        assert!(has_extension("archive.TAR.GZ", ARCHIVE_EXTENSIONS));
    }
}
