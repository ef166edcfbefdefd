use std::time::Duration;

use boardwatch_core::error::AppError;
use boardwatch_core::traits::Fetcher;
use reqwest::{Client, redirect};
use url::Url;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;

/// Settings for [`ReqwestFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Hosts the crawler may talk to. Anything else is refused before any I/O.
    pub allowed_hosts: Vec<String>,
    pub timeout: Duration,
    /// Skip TLS certificate verification (the source site has served broken chains).
    pub accept_invalid_certs: bool,
}

impl FetcherConfig {
    pub fn new(allowed_host: impl Into<String>) -> Self {
        Self {
            allowed_hosts: vec![allowed_host.into()],
            timeout: DEFAULT_FETCH_TIMEOUT,
            accept_invalid_certs: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }
}

/// HTTP fetcher using reqwest, confined to a set of allowed hosts.
///
/// Redirects are followed only while they stay on an allowed host.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    allowed_hosts: Vec<String>,
}

impl ReqwestFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, AppError> {
        let allowed_hosts: Vec<String> = config
            .allowed_hosts
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if allowed_hosts.is_empty() {
            return Err(AppError::ConfigError(
                "At least one allowed host is required".into(),
            ));
        }

        let redirect_hosts = allowed_hosts.clone();
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
            }
            match check_url(attempt.url(), &redirect_hosts) {
                Ok(()) => attempt.follow(),
                Err(e) => attempt.error(e.to_string()),
            }
        });

        if config.accept_invalid_certs {
            tracing::warn!("TLS certificate verification is disabled");
        }

        let client = Client::builder()
            .user_agent("Boardwatch/0.1 (listing monitor)")
            .timeout(config.timeout)
            .redirect(policy)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: config.timeout.as_secs(),
            allowed_hosts,
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        validate_url(url, &self.allowed_hosts)?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else if e.is_redirect() {
                AppError::HostNotAllowed(format!("Redirect refused for {url}: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Host confinement
// ---------------------------------------------------------------------------

/// Reject URLs the crawler must not visit.
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Require a host.
/// 3. Require that host to be one of the allowed hosts (exact, case-insensitive).
fn validate_url(url: &str, allowed_hosts: &[String]) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;
    check_url(&parsed, allowed_hosts)
}

fn check_url(url: &Url, allowed_hosts: &[String]) -> Result<(), AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HostNotAllowed(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| AppError::HostNotAllowed("URL has no host".to_string()))?
        .to_ascii_lowercase();

    if allowed_hosts.iter().any(|allowed| *allowed == host) {
        Ok(())
    } else {
        Err(AppError::HostNotAllowed(host))
    }
}
