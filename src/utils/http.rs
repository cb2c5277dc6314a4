// src/utils/http.rs

//! HTTP client utilities.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::HttpConfig;

/// User agent sent to catalog APIs.
pub const API_USER_AGENT: &str = concat!("restock/", env!("CARGO_PKG_VERSION"));

/// Create a configured asynchronous HTTP client for catalog APIs.
pub fn create_async_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(API_USER_AGENT)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a URL and return the body, failing on non-2xx statuses.
pub async fn get_text(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<String> {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request
        .send()
        .await
        .map_err(|e| AppError::upstream(url, describe(&e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::upstream(url, format!("HTTP {}", status.as_u16())));
    }
    response
        .text()
        .await
        .map_err(|e| AppError::upstream(url, describe(&e)))
}

/// Human-readable reqwest failure.
pub fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}

/// Round-robin user agent selection.
#[derive(Debug)]
pub struct UserAgentRotation {
    agents: Vec<String>,
    next: AtomicUsize,
}

impl UserAgentRotation {
    pub fn new(agents: &[String]) -> Self {
        let agents: Vec<String> = agents
            .iter()
            .filter(|ua| !ua.trim().is_empty())
            .cloned()
            .collect();
        Self {
            agents,
            next: AtomicUsize::new(0),
        }
    }

    /// Next agent in the rotation, falling back to the API agent.
    pub fn next(&self) -> &str {
        if self.agents.is_empty() {
            return API_USER_AGENT;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        &self.agents[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_cycles() {
        let rotation = UserAgentRotation::new(&["a".to_string(), "b".to_string()]);
        assert_eq!(rotation.next(), "a");
        assert_eq!(rotation.next(), "b");
        assert_eq!(rotation.next(), "a");
    }

    #[test]
    fn test_rotation_skips_blank_agents() {
        let rotation = UserAgentRotation::new(&["  ".to_string()]);
        assert_eq!(rotation.next(), API_USER_AGENT);
    }

    #[test]
    fn test_client_builds_from_defaults() {
        assert!(create_async_client(&HttpConfig::default()).is_ok());
    }
}
