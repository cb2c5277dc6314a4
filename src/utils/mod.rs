//! Utility functions and helpers.

pub mod clock;
pub mod http;

use url::Url;

/// Extract the lower-cased host from a URL string.
pub fn get_domain(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_lowercase()))
}

/// Parse and check that a URL is http(s).
pub fn parse_http_url(url_str: &str) -> Option<Url> {
    Url::parse(url_str.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}
