//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ClassifierRules, Source};
use crate::error::{AppError, Result};

/// Environment variable overriding `sync.access_key`.
pub const ACCESS_KEY_ENV: &str = "SYNC_ACCESS_KEY";

/// Environment variable overriding `sync.pokemon_api_key`.
pub const POKEMON_API_KEY_ENV: &str = "POKEMON_TCG_API_KEY";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Outbound HTTP behavior
    #[serde(default)]
    pub http: HttpConfig,

    /// Catalog sync job settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Monitor sweep settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Stock classification rule table
    #[serde(default)]
    pub classifier: ClassifierRules,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            let mut config = Self::default();
            config.apply_env();
            config
        })
    }

    /// Override secrets from the environment when set.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(ACCESS_KEY_ENV) {
            if !key.trim().is_empty() {
                self.sync.access_key = key;
            }
        }
        if let Ok(key) = std::env::var(POKEMON_API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.sync.pokemon_api_key = Some(key);
            }
        }
    }

    /// Serialize configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(AppError::validation("http.user_agents is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.min_jitter_ms > self.http.max_jitter_ms {
            return Err(AppError::validation(
                "http.min_jitter_ms must be <= http.max_jitter_ms",
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(AppError::validation("sync.batch_size must be > 0"));
        }
        if self.sync.fetch_timeout_secs == 0 {
            return Err(AppError::validation("sync.fetch_timeout_secs must be > 0"));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(AppError::validation("scheduler.interval_secs must be > 0"));
        }
        if self.scheduler.batch_size == 0 {
            return Err(AppError::validation("scheduler.batch_size must be > 0"));
        }
        if self.scheduler.min_frequency_minutes <= 0 {
            return Err(AppError::validation(
                "scheduler.min_frequency_minutes must be > 0",
            ));
        }
        self.classifier.validate()
    }
}

/// HTTP client settings shared by catalog and page fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent headers rotated across page fetches
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Lower bound of the random delay before a page fetch
    #[serde(default = "defaults::min_jitter")]
    pub min_jitter_ms: u64,

    /// Upper bound of the random delay before a page fetch
    #[serde(default = "defaults::max_jitter")]
    pub max_jitter_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agents: defaults::user_agents(),
            timeout_secs: defaults::timeout(),
            min_jitter_ms: defaults::min_jitter(),
            max_jitter_ms: defaults::max_jitter(),
        }
    }
}

/// Catalog sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Shared secret callers must present
    #[serde(default)]
    pub access_key: String,

    /// Minimum seconds between successful syncs of one source
    #[serde(default = "defaults::cooldown")]
    pub cooldown_secs: u64,

    /// Records per upsert batch
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Upper bound for a whole catalog fetch, pagination included
    #[serde(default = "defaults::fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Optional pokemontcg.io API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pokemon_api_key: Option<String>,

    /// Upstream base URLs
    #[serde(default)]
    pub endpoints: SourceEndpoints,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            cooldown_secs: defaults::cooldown(),
            batch_size: defaults::batch_size(),
            fetch_timeout_secs: defaults::fetch_timeout(),
            pokemon_api_key: None,
            endpoints: SourceEndpoints::default(),
        }
    }
}

/// Base URLs of the upstream catalog APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEndpoints {
    #[serde(default = "defaults::pokemon_endpoint")]
    pub pokemon: String,
    #[serde(default = "defaults::mtg_endpoint")]
    pub mtg: String,
    #[serde(default = "defaults::yugioh_endpoint")]
    pub yugioh: String,
    #[serde(default = "defaults::lorcana_endpoint")]
    pub lorcana: String,
}

impl SourceEndpoints {
    pub fn for_source(&self, source: Source) -> &str {
        match source {
            Source::Pokemon => &self.pokemon,
            Source::Mtg => &self.mtg,
            Source::Yugioh => &self.yugioh,
            Source::Lorcana => &self.lorcana,
        }
    }
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            pokemon: defaults::pokemon_endpoint(),
            mtg: defaults::mtg_endpoint(),
            yugioh: defaults::yugioh_endpoint(),
            lorcana: defaults::lorcana_endpoint(),
        }
    }
}

/// Monitor sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between sweeps
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Maximum checks dispatched per sweep
    #[serde(default = "defaults::sweep_batch")]
    pub batch_size: usize,

    /// Pause between checks within a sweep
    #[serde(default = "defaults::check_delay")]
    pub check_delay_ms: u64,

    /// Floor for the out-of-stock eager frequency
    #[serde(default = "defaults::min_frequency")]
    pub min_frequency_minutes: i64,

    /// A `checking` claim older than this is considered abandoned
    #[serde(default = "defaults::stale_check")]
    pub stale_check_minutes: i64,

    /// Parallelism for manual "check all"
    #[serde(default = "defaults::check_all_concurrency")]
    pub check_all_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            batch_size: defaults::sweep_batch(),
            check_delay_ms: defaults::check_delay(),
            min_frequency_minutes: defaults::min_frequency(),
            stale_check_minutes: defaults::stale_check(),
            check_all_concurrency: defaults::check_all_concurrency(),
        }
    }
}

mod defaults {
    // HTTP defaults
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".into(),
            "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".into(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 Edg/124.0".into(),
        ]
    }
    pub fn timeout() -> u64 {
        20
    }
    pub fn min_jitter() -> u64 {
        250
    }
    pub fn max_jitter() -> u64 {
        1500
    }

    // Sync defaults
    pub fn cooldown() -> u64 {
        300
    }
    pub fn batch_size() -> usize {
        50
    }
    pub fn fetch_timeout() -> u64 {
        120
    }
    pub fn pokemon_endpoint() -> String {
        "https://api.pokemontcg.io/v2/sets".into()
    }
    pub fn mtg_endpoint() -> String {
        "https://api.scryfall.com/sets".into()
    }
    pub fn yugioh_endpoint() -> String {
        "https://db.ygoprodeck.com/api/v7/cardsets.php".into()
    }
    pub fn lorcana_endpoint() -> String {
        "https://api.lorcast.com/v0/sets".into()
    }

    // Scheduler defaults
    pub fn interval() -> u64 {
        60
    }
    pub fn sweep_batch() -> usize {
        3
    }
    pub fn check_delay() -> u64 {
        2000
    }
    pub fn min_frequency() -> i64 {
        5
    }
    pub fn stale_check() -> i64 {
        10
    }
    pub fn check_all_concurrency() -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agents() {
        let mut config = Config::default();
        config.http.user_agents = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_jitter() {
        let mut config = Config::default();
        config.http.min_jitter_ms = 2000;
        config.http.max_jitter_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            access_key = "s3cret"
            cooldown_secs = 60

            [scheduler]
            batch_size = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.access_key, "s3cret");
        assert_eq!(config.sync.cooldown_secs, 60);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.scheduler.batch_size, 5);
        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.http.timeout_secs, 20);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.classifier.sites.len(), 4);
    }
}
