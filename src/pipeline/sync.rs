//! Sync job engine.
//!
//! A sync request is authorized, checked against the local cooldown, then
//! admitted atomically by the store. Accepted jobs are driven by a spawned
//! task through `fetching_data → processing_data → saving_to_database →
//! completed`; any error moves the job to `failed` and leaves committed
//! batches in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cache::RateLimiter;
use crate::error::{AppError, Result};
use crate::models::{CatalogSet, JobStatus, Source, SyncConfig, SyncJob};
use crate::services::CatalogSource;
use crate::storage::{Admission, SyncStore};
use crate::utils::clock::Clock;

/// Failure message for jobs found unfinished at startup.
pub const ABANDONED_MESSAGE: &str = "abandoned: process restarted before completion";

/// Handle returned for an accepted sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncTicket {
    pub job_id: String,
}

pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    sources: HashMap<Source, Arc<dyn CatalogSource>>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn SyncStore>,
        sources: Vec<Arc<dyn CatalogSource>>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        limiter: RateLimiter,
    ) -> Self {
        let sources = sources.into_iter().map(|s| (s.source(), s)).collect();
        Self {
            store,
            sources,
            config,
            clock,
            limiter,
        }
    }

    /// Limiter key for a source's cooldown.
    pub fn limiter_key(source: Source) -> String {
        format!("sync:{}", source)
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.config.cooldown_secs as i64)
    }

    /// Compare the presented key against the configured secret by digest.
    fn authorize(&self, access_key: &str) -> Result<()> {
        if self.config.access_key.is_empty() {
            log::warn!("Sync request rejected: no access key configured");
            return Err(AppError::Unauthorized);
        }
        let expected = Sha256::digest(self.config.access_key.as_bytes());
        let presented = Sha256::digest(access_key.as_bytes());
        if expected != presented {
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }

    /// Authorize and admit a job without starting it.
    pub async fn admit(&self, source: Source, access_key: &str) -> Result<SyncJob> {
        self.authorize(access_key)?;

        let key = Self::limiter_key(source);
        if self.limiter.is_rate_limited(&key) {
            return Err(AppError::RateLimited {
                retry_after_secs: self.limiter.time_remaining(&key).max(1),
            });
        }

        if !self.sources.contains_key(&source) {
            return Err(AppError::validation(format!(
                "No adapter configured for source '{}'",
                source
            )));
        }

        let now = self.clock.now();
        match self
            .store
            .admit_job(SyncJob::new(source, now), self.cooldown(), now)
            .await?
        {
            Admission::Created(job) => {
                log::info!("Accepted sync {} for {}", job.job_id, source);
                Ok(job)
            }
            Admission::Existing(job) => {
                log::info!("Sync for {} already running as {}", source, job.job_id);
                Err(AppError::Conflict { job_id: job.job_id })
            }
            Admission::CoolingDown { retry_after_secs } => {
                self.limiter.sync_server_rate_limit(&key, retry_after_secs);
                Err(AppError::RateLimited { retry_after_secs })
            }
        }
    }

    /// Admit a job and drive it on a background task.
    pub async fn request_sync(
        self: &Arc<Self>,
        source: Source,
        access_key: &str,
    ) -> Result<SyncTicket> {
        let job = self.admit(source, access_key).await?;
        let ticket = SyncTicket {
            job_id: job.job_id.clone(),
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_to_completion(job).await;
        });
        Ok(ticket)
    }

    /// Drive `job` to a terminal state and return the final record.
    pub async fn run_to_completion(&self, mut job: SyncJob) -> SyncJob {
        match self.drive(&mut job).await {
            Ok(()) => log::info!(
                "Sync {} completed: {} sets from {}",
                job.job_id,
                job.completed_items,
                job.source
            ),
            Err(e) => {
                log::error!("Sync {} failed: {}", job.job_id, e);
                if let Err(fail_err) = job.fail(e.to_string(), self.clock.now()) {
                    log::error!("Sync {} could not be failed: {}", job.job_id, fail_err);
                } else if let Err(store_err) = self.store.update_job(&job).await {
                    log::error!("Sync {} failure not persisted: {}", job.job_id, store_err);
                }
            }
        }
        job
    }

    async fn drive(&self, job: &mut SyncJob) -> Result<()> {
        let adapter = self
            .sources
            .get(&job.source)
            .cloned()
            .ok_or_else(|| AppError::validation(format!("No adapter for {}", job.source)))?;

        self.transition(job, JobStatus::FetchingData).await?;
        let limit = std::time::Duration::from_secs(self.config.fetch_timeout_secs);
        let fetched = tokio::time::timeout(limit, adapter.fetch())
            .await
            .map_err(|_| {
                AppError::upstream(
                    job.source.as_str(),
                    format!("timed out after {}s", self.config.fetch_timeout_secs),
                )
            })??;

        job.total_items = fetched.len();
        self.transition(job, JobStatus::ProcessingData).await?;
        let records = prepare(fetched, self.clock.now());
        log::debug!(
            "Sync {}: {} records after normalization ({} fetched)",
            job.job_id,
            records.len(),
            job.total_items
        );
        job.total_items = records.len();

        self.transition(job, JobStatus::SavingToDatabase).await?;
        for batch in records.chunks(self.config.batch_size.max(1)) {
            self.store.upsert_sets(batch).await?;
            job.record_progress(batch.len(), self.clock.now());
            self.store.update_job(job).await?;
        }

        self.transition(job, JobStatus::Completed).await?;
        self.limiter
            .set_rate_limit(&Self::limiter_key(job.source), self.config.cooldown_secs);
        let finished_at = job.completed_at.unwrap_or_else(|| self.clock.now());
        if let Err(e) = self.store.record_sync(job.source, finished_at).await {
            log::warn!("Sync {}: last sync time not recorded: {}", job.job_id, e);
        }
        Ok(())
    }

    /// Persist the next state before adopting it locally.
    async fn transition(&self, job: &mut SyncJob, next: JobStatus) -> Result<()> {
        let mut updated = job.clone();
        updated.advance(next, self.clock.now())?;
        self.store.update_job(&updated).await?;
        log::debug!("Sync {}: {} -> {}", job.job_id, job.status, next);
        *job = updated;
        Ok(())
    }

    pub async fn get_status(&self, job_id: &str) -> Result<SyncJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job {}", job_id)))
    }

    pub async fn list_jobs(&self) -> Result<Vec<SyncJob>> {
        self.store.list_jobs().await
    }

    pub async fn last_sync(&self, source: Source) -> Result<Option<DateTime<Utc>>> {
        self.store.last_sync(source).await
    }

    /// Fail every non-terminal job left over from a previous process.
    pub async fn recover_abandoned(&self) -> Result<usize> {
        let active = self.store.active_jobs().await?;
        let count = active.len();
        for mut job in active {
            job.fail(ABANDONED_MESSAGE, self.clock.now())?;
            self.store.update_job(&job).await?;
            log::warn!("Marked abandoned sync {} ({}) as failed", job.job_id, job.source);
        }
        Ok(count)
    }
}

/// Trim ids, drop records without one, dedupe by natural key (first wins)
/// and stamp the sync time.
fn prepare(records: Vec<CatalogSet>, now: DateTime<Utc>) -> Vec<CatalogSet> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .map(|mut r| {
            r.set_id = r.set_id.trim().to_string();
            r.synced_at = now;
            r
        })
        .filter(|r| !r.set_id.is_empty())
        .filter(|r| seen.insert(r.natural_key()))
        .collect()
}
