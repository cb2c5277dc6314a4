// src/models/mod.rs

//! Domain models for the sync and monitor engine.
//!
//! This module contains the persisted records, the configuration tree and
//! the classifier rule table.

mod catalog;
mod config;
mod job;
mod monitor;
mod rules;

// Re-export all public types
pub use catalog::{CatalogSet, parse_release_date};
pub use config::{
    ACCESS_KEY_ENV, Config, HttpConfig, POKEMON_API_KEY_ENV, SchedulerConfig, SourceEndpoints,
    SyncConfig,
};
pub use job::{JobStatus, Source, SyncJob};
pub use monitor::{CheckResult, Monitor, MonitorStatus};
pub use rules::{ClassifierRules, Signal, SiteCheck, SiteRule, Verdict};
