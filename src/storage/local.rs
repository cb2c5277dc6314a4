//! Local filesystem storage implementation.
//!
//! State is cached in memory behind one async mutex. A file-backed store
//! re-reads the affected JSON file under that lock before every operation
//! and writes it back after every mutation, so several handles (a running
//! `watch` and a one-off `monitor add`) see each other's writes. Writes are
//! atomic (temp file, then rename). Without a root directory the store is
//! purely in-memory, which is what tests and one-off classifications use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{CatalogSet, CheckResult, Monitor, MonitorStatus, Source, SyncJob};
use crate::storage::{Admission, MonitorStore, SyncStore};

const JOBS_KEY: &str = "jobs.json";
const MONITORS_KEY: &str = "monitors.json";

/// Terminal jobs kept in the ledger; older ones are pruned on insert.
const MAX_TERMINAL_JOBS: usize = 200;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobLedger {
    #[serde(default)]
    jobs: Vec<SyncJob>,
    /// Source slug -> last successful sync
    #[serde(default)]
    last_sync: BTreeMap<String, DateTime<Utc>>,
}

impl JobLedger {
    fn prune(&mut self) {
        let terminal = self.jobs.iter().filter(|j| j.is_terminal()).count();
        let mut excess = terminal.saturating_sub(MAX_TERMINAL_JOBS);
        self.jobs.retain(|job| {
            if excess > 0 && job.is_terminal() {
                excess -= 1;
                return false;
            }
            true
        });
    }
}

#[derive(Debug, Default)]
struct State {
    ledger: JobLedger,
    monitors: BTreeMap<String, Monitor>,
    /// Source -> set_id -> record
    sets: BTreeMap<Source, BTreeMap<String, CatalogSet>>,
}

/// JSON-file backed store implementing both store traits.
#[derive(Debug)]
pub struct LocalStorage {
    root_dir: Option<PathBuf>,
    state: Mutex<State>,
}

impl LocalStorage {
    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            root_dir: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Open (or create) a store rooted at `root_dir`, loading existing files.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        tokio::fs::create_dir_all(&root_dir).await?;
        let location = root_dir.display().to_string();

        let store = Self {
            root_dir: Some(root_dir),
            state: Mutex::new(State::default()),
        };
        {
            let mut state = store.state.lock().await;
            store.reload_ledger(&mut state).await?;
            store.reload_monitors(&mut state).await?;
            for source in Source::ALL {
                store.reload_sets(&mut state, source).await?;
            }
            log::info!(
                "Opened store at {} ({} jobs, {} monitors, {} catalog sources)",
                location,
                state.ledger.jobs.len(),
                state.monitors.len(),
                state.sets.len()
            );
        }
        Ok(store)
    }

    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }

    fn catalog_key(source: Source) -> String {
        format!("catalog/{}.json", source)
    }

    async fn reload_ledger(&self, state: &mut State) -> Result<()> {
        if let Some(root) = &self.root_dir {
            state.ledger = read_json(&root.join(JOBS_KEY)).await?.unwrap_or_default();
        }
        Ok(())
    }

    async fn reload_monitors(&self, state: &mut State) -> Result<()> {
        if let Some(root) = &self.root_dir {
            let monitors: Vec<Monitor> =
                read_json(&root.join(MONITORS_KEY)).await?.unwrap_or_default();
            state.monitors = monitors.into_iter().map(|m| (m.id.clone(), m)).collect();
        }
        Ok(())
    }

    async fn reload_sets(&self, state: &mut State, source: Source) -> Result<()> {
        let Some(root) = &self.root_dir else {
            return Ok(());
        };
        let records: Vec<CatalogSet> = read_json(&root.join(Self::catalog_key(source)))
            .await?
            .unwrap_or_default();
        if records.is_empty() {
            state.sets.remove(&source);
        } else {
            let by_id = records.into_iter().map(|s| (s.set_id.clone(), s)).collect();
            state.sets.insert(source, by_id);
        }
        Ok(())
    }

    /// Write `value` under `key` if this store is file-backed.
    async fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let Some(root) = &self.root_dir else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(value)?;
        write_bytes(&root.join(key), &bytes)
            .await
            .map_err(|e| AppError::persistence(format!("{key}: {e}")))
    }

    async fn persist_monitors(&self, monitors: &BTreeMap<String, Monitor>) -> Result<()> {
        let list: Vec<&Monitor> = monitors.values().collect();
        self.persist(MONITORS_KEY, &list).await
    }
}

/// Write bytes atomically (write to temp, then rename).
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read JSON, returning None if the file doesn't exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Whole seconds left in the window, rounded up.
fn ceil_secs(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

#[async_trait]
impl SyncStore for LocalStorage {
    async fn admit_job(
        &self,
        job: SyncJob,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let mut state = self.state.lock().await;
        self.reload_ledger(&mut state).await?;

        if let Some(existing) = state
            .ledger
            .jobs
            .iter()
            .find(|j| j.source == job.source && !j.is_terminal())
        {
            return Ok(Admission::Existing(existing.clone()));
        }

        if let Some(last) = state.ledger.last_sync.get(job.source.as_str()) {
            let elapsed = now - *last;
            if elapsed < cooldown {
                return Ok(Admission::CoolingDown {
                    retry_after_secs: ceil_secs(cooldown - elapsed),
                });
            }
        }

        state.ledger.jobs.push(job.clone());
        state.ledger.prune();
        if let Err(e) = self.persist(JOBS_KEY, &state.ledger).await {
            state.ledger.jobs.retain(|j| j.job_id != job.job_id);
            return Err(e);
        }
        Ok(Admission::Created(job))
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<SyncJob>> {
        let mut state = self.state.lock().await;
        self.reload_ledger(&mut state).await?;
        Ok(state.ledger.jobs.iter().find(|j| j.job_id == job_id).cloned())
    }

    async fn update_job(&self, job: &SyncJob) -> Result<()> {
        let mut state = self.state.lock().await;
        self.reload_ledger(&mut state).await?;
        let stored = state
            .ledger
            .jobs
            .iter_mut()
            .find(|j| j.job_id == job.job_id)
            .ok_or_else(|| AppError::not_found(format!("job {}", job.job_id)))?;

        if stored.is_terminal() {
            return Err(AppError::InvalidTransition {
                from: stored.status.to_string(),
                to: job.status.to_string(),
            });
        }
        *stored = job.clone();
        self.persist(JOBS_KEY, &state.ledger).await
    }

    async fn list_jobs(&self) -> Result<Vec<SyncJob>> {
        let mut state = self.state.lock().await;
        self.reload_ledger(&mut state).await?;
        Ok(state.ledger.jobs.clone())
    }

    async fn last_sync(&self, source: Source) -> Result<Option<DateTime<Utc>>> {
        let mut state = self.state.lock().await;
        self.reload_ledger(&mut state).await?;
        Ok(state.ledger.last_sync.get(source.as_str()).copied())
    }

    async fn record_sync(&self, source: Source, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        self.reload_ledger(&mut state).await?;
        state.ledger.last_sync.insert(source.as_str().to_string(), at);
        self.persist(JOBS_KEY, &state.ledger).await
    }

    async fn upsert_sets(&self, sets: &[CatalogSet]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut touched = Vec::new();
        for set in sets {
            if !touched.contains(&set.source) {
                self.reload_sets(&mut state, set.source).await?;
                touched.push(set.source);
            }
        }
        for set in sets {
            state
                .sets
                .entry(set.source)
                .or_default()
                .insert(set.set_id.clone(), set.clone());
        }

        for source in touched {
            let records: Vec<&CatalogSet> = state
                .sets
                .get(&source)
                .map(|by_id| by_id.values().collect())
                .unwrap_or_default();
            self.persist(&Self::catalog_key(source), &records).await?;
        }
        Ok(sets.len())
    }

    async fn list_sets(&self, source: Source) -> Result<Vec<CatalogSet>> {
        let mut state = self.state.lock().await;
        self.reload_sets(&mut state, source).await?;
        Ok(state
            .sets
            .get(&source)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl MonitorStore for LocalStorage {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let mut state = self.state.lock().await;
        self.reload_monitors(&mut state).await?;
        Ok(state.monitors.values().cloned().collect())
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>> {
        let mut state = self.state.lock().await;
        self.reload_monitors(&mut state).await?;
        Ok(state.monitors.get(id).cloned())
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let mut state = self.state.lock().await;
        self.reload_monitors(&mut state).await?;
        state.monitors.insert(monitor.id.clone(), monitor.clone());
        self.persist_monitors(&state.monitors).await
    }

    async fn delete_monitor(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.reload_monitors(&mut state).await?;
        if state.monitors.remove(id).is_none() {
            return Ok(false);
        }
        self.persist_monitors(&state.monitors).await?;
        Ok(true)
    }

    async fn try_begin_check(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Option<Monitor>> {
        let mut state = self.state.lock().await;
        self.reload_monitors(&mut state).await?;
        let monitor = state
            .monitors
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("monitor {id}")))?;

        if monitor.status == MonitorStatus::Checking {
            let started = monitor.check_started_at;
            let fresh = started.is_some_and(|at| now - at < stale_after);
            if fresh {
                return Ok(None);
            }
            log::warn!("Reclaiming stale check on monitor {}", monitor.id);
        }

        let before = monitor.clone();
        monitor.status = MonitorStatus::Checking;
        monitor.check_started_at = Some(now);
        self.persist_monitors(&state.monitors).await?;
        Ok(Some(before))
    }

    async fn finish_check(
        &self,
        id: &str,
        result: &CheckResult,
        checked_at: DateTime<Utc>,
    ) -> Result<Option<Monitor>> {
        let mut state = self.state.lock().await;
        self.reload_monitors(&mut state).await?;
        let Some(monitor) = state.monitors.get_mut(id) else {
            return Ok(None);
        };
        monitor.apply_check(result, checked_at);
        let updated = monitor.clone();
        self.persist_monitors(&state.monitors).await?;
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn cooldown() -> Duration {
        Duration::seconds(300)
    }

    #[tokio::test]
    async fn test_admit_returns_existing_live_job() {
        let store = LocalStorage::in_memory();
        let first = SyncJob::new(Source::Pokemon, now());
        let admitted = store.admit_job(first.clone(), cooldown(), now()).await.unwrap();
        assert_eq!(admitted, Admission::Created(first.clone()));

        let second = SyncJob::new(Source::Pokemon, now());
        match store.admit_job(second, cooldown(), now()).await.unwrap() {
            Admission::Existing(job) => assert_eq!(job.job_id, first.job_id),
            other => panic!("expected existing job, got {other:?}"),
        }

        // Other sources are independent
        let mtg = SyncJob::new(Source::Mtg, now());
        assert!(matches!(
            store.admit_job(mtg, cooldown(), now()).await.unwrap(),
            Admission::Created(_)
        ));
        assert_eq!(store.active_jobs().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_admit_respects_cooldown() {
        let store = LocalStorage::in_memory();
        store.record_sync(Source::Mtg, now()).await.unwrap();

        let later = now() + Duration::seconds(100);
        let job = SyncJob::new(Source::Mtg, later);
        assert_eq!(
            store.admit_job(job, cooldown(), later).await.unwrap(),
            Admission::CoolingDown {
                retry_after_secs: 200
            }
        );

        let after = now() + Duration::seconds(301);
        let job = SyncJob::new(Source::Mtg, after);
        assert!(matches!(
            store.admit_job(job, cooldown(), after).await.unwrap(),
            Admission::Created(_)
        ));
    }

    #[tokio::test]
    async fn test_terminal_job_is_immutable() {
        let store = LocalStorage::in_memory();
        let mut job = SyncJob::new(Source::Lorcana, now());
        store.admit_job(job.clone(), cooldown(), now()).await.unwrap();

        job.fail("boom", now()).unwrap();
        store.update_job(&job).await.unwrap();

        job.error = Some("rewritten".into());
        let err = store.update_job(&job).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let stored = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let store = LocalStorage::in_memory();
        let job = SyncJob::new(Source::Yugioh, now());
        assert!(matches!(
            store.update_job(&job).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = LocalStorage::in_memory();
        let mut set = CatalogSet::new(Source::Pokemon, "sv1", "Scarlet & Violet");
        store.upsert_sets(&[set.clone()]).await.unwrap();
        set.total_cards = Some(258);
        store.upsert_sets(&[set.clone()]).await.unwrap();

        let sets = store.list_sets(Source::Pokemon).await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].total_cards, Some(258));
        assert!(store.list_sets(Source::Mtg).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_try_begin_check_is_exclusive() {
        let store = LocalStorage::in_memory();
        let monitor = Monitor::new("m1", "https://shop.example/item", 30, now());
        store.save_monitor(&monitor).await.unwrap();

        let stale = Duration::minutes(10);
        let claimed = store.try_begin_check("m1", now(), stale).await.unwrap();
        assert_eq!(claimed.unwrap().status, MonitorStatus::Pending);

        let again = store
            .try_begin_check("m1", now() + Duration::minutes(1), stale)
            .await
            .unwrap();
        assert!(again.is_none());

        let reclaimed = store
            .try_begin_check("m1", now() + Duration::minutes(11), stale)
            .await
            .unwrap();
        assert_eq!(reclaimed.unwrap().status, MonitorStatus::Checking);

        assert!(matches!(
            store.try_begin_check("missing", now(), stale).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = LocalStorage::open(tmp.path()).await.unwrap();
            let job = SyncJob::new(Source::Pokemon, now());
            store.admit_job(job, cooldown(), now()).await.unwrap();
            store.record_sync(Source::Pokemon, now()).await.unwrap();
            store
                .upsert_sets(&[CatalogSet::new(Source::Pokemon, "sv1", "Scarlet & Violet")])
                .await
                .unwrap();
            store
                .save_monitor(&Monitor::new("m1", "https://shop.example", 30, now()))
                .await
                .unwrap();
        }

        assert!(tmp.path().join("catalog/pokemon.json").exists());

        let store = LocalStorage::open(tmp.path()).await.unwrap();
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);
        assert_eq!(store.last_sync(Source::Pokemon).await.unwrap(), Some(now()));
        assert_eq!(store.list_sets(Source::Pokemon).await.unwrap().len(), 1);
        assert!(store.get_monitor("m1").await.unwrap().is_some());
        assert!(store.delete_monitor("m1").await.unwrap());
        assert!(!store.delete_monitor("m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_two_handles_share_writes() {
        let tmp = TempDir::new().unwrap();
        let watcher = LocalStorage::open(tmp.path()).await.unwrap();
        let operator = LocalStorage::open(tmp.path()).await.unwrap();

        operator
            .save_monitor(&Monitor::new("added", "https://shop.example/a", 30, now()))
            .await
            .unwrap();
        watcher
            .save_monitor(&Monitor::new("old", "https://shop.example/o", 30, now()))
            .await
            .unwrap();

        let job = SyncJob::new(Source::Mtg, now());
        operator.admit_job(job.clone(), cooldown(), now()).await.unwrap();
        watcher.record_sync(Source::Pokemon, now()).await.unwrap();

        let reopened = LocalStorage::open(tmp.path()).await.unwrap();
        let ids: Vec<String> = reopened
            .list_monitors()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["added".to_string(), "old".to_string()]);
        assert!(reopened.get_job(&job.job_id).await.unwrap().is_some());
        assert_eq!(reopened.last_sync(Source::Pokemon).await.unwrap(), Some(now()));
        assert!(watcher.get_monitor("added").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finish_check_keeps_concurrent_edits() {
        let store = LocalStorage::in_memory();
        let mut monitor = Monitor::new("m1", "https://shop.example/item", 30, now());
        monitor.record_failure("HTTP 503", now());
        store.save_monitor(&monitor).await.unwrap();

        let stale = Duration::minutes(10);
        store.try_begin_check("m1", now(), stale).await.unwrap().unwrap();

        // Paused and reset while the check runs
        let mut edited = store.get_monitor("m1").await.unwrap().unwrap();
        edited.is_active = false;
        edited.reset_errors();
        store.save_monitor(&edited).await.unwrap();

        let later = now() + Duration::minutes(1);
        let updated = store
            .finish_check("m1", &CheckResult::Failed("HTTP 502".into()), later)
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.consecutive_errors, 1);
        assert_eq!(updated.status, MonitorStatus::Error);
        assert!(updated.check_started_at.is_none());
        assert_eq!(store.get_monitor("m1").await.unwrap().unwrap(), updated);

        store.delete_monitor("m1").await.unwrap();
        let gone = store
            .finish_check("m1", &CheckResult::Verdict(MonitorStatus::InStock), later)
            .await
            .unwrap();
        assert!(gone.is_none());
        assert!(store.list_monitors().await.unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_live_jobs() {
        let mut ledger = JobLedger::default();
        for _ in 0..MAX_TERMINAL_JOBS + 5 {
            let mut job = SyncJob::new(Source::Mtg, now());
            job.fail("x", now()).unwrap();
            ledger.jobs.push(job);
        }
        ledger.jobs.push(SyncJob::new(Source::Mtg, now()));
        ledger.prune();
        assert_eq!(ledger.jobs.len(), MAX_TERMINAL_JOBS + 1);
        assert!(!ledger.jobs.last().unwrap().is_terminal());
    }
}
