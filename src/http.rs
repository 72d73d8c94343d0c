//! Shared HTTP client.

use std::time::Duration;

use reqwest::Client;

/// Default user agent for the application.
pub const USER_AGENT: &str = concat!("aipipe/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream client wrapper with a standard configuration.
///
/// No overall request timeout: streaming responses run as long as the
/// upstream keeps sending. The URL pass-through applies its own wall-clock
/// limit.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        let inner = match Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build HTTP client with custom config; using defaults");
                Client::new()
            }
        };
        Self { inner }
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
