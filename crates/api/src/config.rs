use std::time::Duration;

use drover_core::{DroverError, DroverResult};

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Per-request deadline; `DROVER_HTTP_TIMEOUT_SECS` overrides the default.
pub fn http_timeout() -> Duration {
    let secs = std::env::var("DROVER_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Connection settings for one CD server. Immutable once built.
#[derive(Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://argocd.example.com/api/v1`, without trailing slash.
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str, token: &str) -> DroverResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(DroverError::InvalidInput(format!("api url must be http(s): {base_url:?}")));
        }
        if token.trim().is_empty() {
            return Err(DroverError::InvalidInput("api token is empty".into()));
        }
        Ok(Self { base_url, token: token.to_string(), timeout: http_timeout() })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// Keep the token out of logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
