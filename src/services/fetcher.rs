//! Page transport for monitor checks.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};

use crate::error::{AppError, Result};
use crate::models::HttpConfig;
use crate::utils::http::{UserAgentRotation, describe};

/// A fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

/// Transport collaborator returning raw page content.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`; non-2xx responses and timeouts are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// reqwest-backed fetcher with jitter and user-agent rotation.
pub struct HttpPageFetcher {
    client: Client,
    agents: UserAgentRotation,
    jitter_ms: (u64, u64),
}

impl HttpPageFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            agents: UserAgentRotation::new(&config.user_agents),
            jitter_ms: (config.min_jitter_ms, config.max_jitter_ms),
        })
    }

    fn jitter(&self) -> Duration {
        let (min, max) = self.jitter_ms;
        if max == 0 || min >= max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let delay = self.jitter();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, self.agents.next())
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| AppError::upstream(url, describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::upstream(url, format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::upstream(url, describe(&e)))?;

        Ok(FetchedPage {
            status: status.as_u16(),
            body,
        })
    }
}
