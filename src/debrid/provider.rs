use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::EngineResult;
use super::types::{AddResult, TorrentInfo, UnrestrictResult};

/// Capability set every debrid backend must implement.
///
/// Instances are cheap: they carry only an api key, a base URL, and an HTTP
/// client, and one is constructed per provider per resolution (see
/// [`super::registry::Registry`]). Every method takes the caller's
/// cancellation context: in-flight socket I/O and any retry backoff sleep
/// must abort as soon as it fires.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short lowercase identifier, e.g. `"realdebrid"`.
    fn name(&self) -> &'static str;

    async fn add_magnet(&self, magnet_uri: &str, cancellation: &CancellationToken) -> EngineResult<AddResult>;

    async fn add_torrent_file(
        &self,
        data: &[u8],
        filename_hint: &str,
        cancellation: &CancellationToken,
    ) -> EngineResult<AddResult>;

    async fn get_torrent_info(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<TorrentInfo>;

    /// `file_ids` is a comma-separated id list, or `"all"`.
    ///
    /// Some providers (Torbox) no-op this call because they auto-select.
    async fn select_files(&self, id: &str, file_ids: &str, cancellation: &CancellationToken) -> EngineResult<()>;

    /// Best-effort; must be idempotent — a second delete of an already-gone
    /// torrent is not an error.
    async fn delete_torrent(&self, id: &str, cancellation: &CancellationToken) -> EngineResult<()>;

    async fn unrestrict_link(&self, link: &str, cancellation: &CancellationToken) -> EngineResult<UnrestrictResult>;

    async fn check_instant_availability(&self, info_hash: &str, cancellation: &CancellationToken) -> EngineResult<bool>;
}

/// Optional capability: drivers that accept construction-time options
/// (e.g. `autoClearQueue`) implement this; drivers that don't, ignore it.
pub trait Configurable {
    fn configure(&mut self, options: &HashMap<String, String>);
}

/// A process-wide name -> constructor mapping. See [`super::registry::Registry`].
///
/// Boxed rather than a bare `fn` pointer so tests can register closures that
/// capture shared state (e.g. `Arc<Mutex<_>>` call counters) alongside the
/// built-in drivers' plain-function factories.
pub type ProviderFactory =
    Box<dyn Fn(String, &HashMap<String, String>) -> Box<dyn Provider> + Send + Sync>;

pub(super) fn reject_invalid_id(id: &str) -> EngineResult<()> {
    if id.is_empty() || id == "0" {
        return Err(super::error::EngineError::internal(format!(
            "invalid torrent id: '{id}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_zero_ids() {
        assert!(reject_invalid_id("").is_err());
        assert!(reject_invalid_id("0").is_err());
        assert!(reject_invalid_id("17").is_ok());
    }
}
