//! Storage abstractions for jobs, monitors and catalog records.
//!
//! The store is the source of truth for durable state. Admission of a new
//! sync job and claiming a monitor for a check are single atomic operations
//! so concurrent callers cannot both win.
//!
//! ## Directory Structure
//!
//! ```text
//! {root}/
//! ├── config.toml           # Engine configuration
//! ├── jobs.json             # Sync jobs + last successful sync per source
//! ├── monitors.json         # Registered monitors
//! └── catalog/              # Normalized set records
//!     ├── pokemon.json
//!     └── mtg.json
//! ```

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::{CatalogSet, CheckResult, Monitor, Source, SyncJob};

pub use local::LocalStorage;

/// Result of asking the store to admit a new sync job.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The job was inserted.
    Created(SyncJob),
    /// A non-terminal job already exists for the source.
    Existing(SyncJob),
    /// The last successful sync is still within the cooldown window.
    CoolingDown { retry_after_secs: u64 },
}

/// Persistence for sync jobs and the catalog records they produce.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Insert `job` unless its source already has a live job or is cooling
    /// down. Evaluated under one lock.
    async fn admit_job(
        &self,
        job: SyncJob,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<Admission>;

    async fn get_job(&self, job_id: &str) -> Result<Option<SyncJob>>;

    /// Replace a stored job. Fails if the stored copy is already terminal.
    async fn update_job(&self, job: &SyncJob) -> Result<()>;

    /// All retained jobs, oldest first.
    async fn list_jobs(&self) -> Result<Vec<SyncJob>>;

    async fn active_jobs(&self) -> Result<Vec<SyncJob>> {
        let jobs = self.list_jobs().await?;
        Ok(jobs.into_iter().filter(|j| !j.is_terminal()).collect())
    }

    /// Time of the last successful sync for `source`.
    async fn last_sync(&self, source: Source) -> Result<Option<DateTime<Utc>>>;

    async fn record_sync(&self, source: Source, at: DateTime<Utc>) -> Result<()>;

    /// Upsert by natural key; returns the number of records written.
    async fn upsert_sets(&self, sets: &[CatalogSet]) -> Result<usize>;

    async fn list_sets(&self, source: Source) -> Result<Vec<CatalogSet>>;
}

/// Persistence for stock monitors.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn list_monitors(&self) -> Result<Vec<Monitor>>;

    async fn list_active_monitors(&self) -> Result<Vec<Monitor>> {
        let monitors = self.list_monitors().await?;
        Ok(monitors.into_iter().filter(|m| m.is_active).collect())
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>>;

    /// Insert or replace.
    async fn save_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Returns whether a monitor was removed.
    async fn delete_monitor(&self, id: &str) -> Result<bool>;

    /// Atomically mark a monitor as `checking`.
    ///
    /// Returns the record as it was before the claim, or `None` if another
    /// check started less than `stale_after` ago. Unknown ids are
    /// `NotFound`.
    async fn try_begin_check(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Option<Monitor>>;

    /// Apply a check result to the current record under the store lock.
    ///
    /// Only the check bookkeeping fields change, so edits made while the
    /// check ran survive. Returns the updated record, or `None` if the
    /// monitor was removed meanwhile.
    async fn finish_check(
        &self,
        id: &str,
        result: &CheckResult,
        checked_at: DateTime<Utc>,
    ) -> Result<Option<Monitor>>;
}
