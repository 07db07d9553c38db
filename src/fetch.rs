use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::FetchError;

/// HTTP client for public survey pages.
pub struct Fetcher {
    client: reqwest::Client,
    retries: u32,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            client,
            retries: settings.retries,
        })
    }

    /// Fetch page markup, retrying transport errors and HTTP errors with backoff.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.retries => {
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    warn!(
                        "Fetch failed for {} ({}), retrying in {}s ({}/{})",
                        url,
                        e,
                        backoff.as_secs(),
                        attempt + 1,
                        self.retries
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        info!("Fetching {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Accept only absolute http(s) URLs whose host belongs to a configured survey domain.
pub fn validate_url(raw: &str, allowed_hosts: &[String]) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|_| FetchError::InvalidUrl(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(raw.to_string()));
    }
    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_lowercase(),
        _ => return Err(FetchError::InvalidUrl(raw.to_string())),
    };
    if allowed_hosts.iter().any(|allowed| host_matches(&host, allowed)) {
        Ok(url)
    } else {
        Err(FetchError::UnsupportedHost(raw.to_string()))
    }
}

fn host_matches(host: &str, allowed: &str) -> bool {
    let allowed = allowed.trim().to_lowercase();
    !allowed.is_empty() && (host == allowed || host.ends_with(&format!(".{}", allowed)))
}
