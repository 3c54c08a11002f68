use std::fmt::Display;

/// Closed error taxonomy for the debrid resolution engine.
///
/// Every failure path in the engine maps to exactly one variant so callers
/// can match on failure class instead of parsing messages.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub message: String,
    pub kind: EngineErrorKind,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// No providers enabled, unknown provider name, missing API key.
    Configuration,
    /// 401/403 from a provider.
    Authentication,
    /// 429 / transient 503 exhausted the driver's retry policy.
    Transient,
    /// Content is not cached on the provider(s) that were checked.
    NotCached,
    /// No media files, archive-only release, or no file matches the target episode.
    Selection,
    /// Provider-specific quota rejection (e.g. Torbox `ACTIVE_LIMIT`) that survived
    /// the auto-clear-and-retry policy.
    Quota,
    /// Post-resolve verification failed (archive extension, HEAD returned >= 400).
    Verification,
    /// Registry lookup miss for a provider name.
    NotRegistered,
    /// Anything else (I/O, deserialization, unexpected provider response shape).
    Internal,
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            EngineErrorKind::Configuration => "Configuration error",
            EngineErrorKind::Authentication => "Authentication error",
            EngineErrorKind::Transient => "Transient error",
            EngineErrorKind::NotCached => "Not cached",
            EngineErrorKind::Selection => "Selection error",
            EngineErrorKind::Quota => "Quota error",
            EngineErrorKind::Verification => "Verification error",
            EngineErrorKind::NotRegistered => "Provider not registered",
            EngineErrorKind::Internal => "Internal error",
        };
        match &self.provider {
            Some(provider) => write!(f, "{kind} ({provider}): {}", self.message),
            None => write!(f, "{kind}: {}", self.message),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl AsRef<str>) -> Self {
        Self {
            message: message.as_ref().into(),
            kind,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: impl AsRef<str>) -> Self {
        self.provider = Some(provider.as_ref().to_lowercase());
        self
    }

    pub fn configuration(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::Configuration, msg)
    }

    pub fn authentication(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::Authentication, msg)
    }

    pub fn transient(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::Transient, msg)
    }

    pub fn not_cached(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::NotCached, msg)
    }

    pub fn selection(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::Selection, msg)
    }

    pub fn quota(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::Quota, msg)
    }

    pub fn verification(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::Verification, msg)
    }

    pub fn not_registered(name: impl AsRef<str>) -> Self {
        Self::new(
            EngineErrorKind::NotRegistered,
            format!("provider '{}' is not registered", name.as_ref()),
        )
        .with_provider(name)
    }

    pub fn internal(msg: impl AsRef<str>) -> Self {
        Self::new(EngineErrorKind::Internal, msg)
    }

    pub fn is_not_cached(&self) -> bool {
        self.kind == EngineErrorKind::NotCached
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return EngineError::transient(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return EngineError::authentication(err.to_string());
            }
            if status.as_u16() == 429 || status.as_u16() == 503 {
                return EngineError::transient(err.to_string());
            }
        }
        EngineError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::internal(format!("failed to deserialize response json body: {err}"))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::internal(err.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::internal(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
