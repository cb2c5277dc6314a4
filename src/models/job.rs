//! Sync job record and its state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// External card-game catalog a job synchronizes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// pokemontcg.io sets API
    Pokemon,
    /// Scryfall sets API
    Mtg,
    /// YGOPRODeck card sets API
    Yugioh,
    /// Lorcast sets API
    Lorcana,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::Pokemon, Source::Mtg, Source::Yugioh, Source::Lorcana];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Pokemon => "pokemon",
            Source::Mtg => "mtg",
            Source::Yugioh => "yugioh",
            Source::Lorcana => "lorcana",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pokemon" => Ok(Source::Pokemon),
            "mtg" => Ok(Source::Mtg),
            "yugioh" => Ok(Source::Yugioh),
            "lorcana" => Ok(Source::Lorcana),
            other => Err(AppError::validation(format!("Unknown source '{other}'"))),
        }
    }
}

/// Lifecycle state of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    FetchingData,
    ProcessingData,
    SavingToDatabase,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `failed` is reachable from every non-terminal state; otherwise the
    /// job only moves one step forward.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (Pending, FetchingData)
            | (FetchingData, ProcessingData)
            | (ProcessingData, SavingToDatabase)
            | (SavingToDatabase, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::FetchingData => "fetching_data",
            JobStatus::ProcessingData => "processing_data",
            JobStatus::SavingToDatabase => "saving_to_database",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One synchronization run against a single source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncJob {
    pub job_id: String,
    pub source: Source,
    pub status: JobStatus,
    /// Percentage, 0-100
    pub progress: u8,
    pub total_items: usize,
    pub completed_items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    /// Create a pending job for `source`.
    pub fn new(source: Source, now: DateTime<Utc>) -> Self {
        Self {
            job_id: Self::generate_id(source, now),
            source,
            status: JobStatus::Pending,
            progress: 0,
            total_items: 0,
            completed_items: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Opaque job id: source slug plus a digest of the creation instant.
    fn generate_id(source: Source, now: DateTime<Utc>) -> String {
        let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros());
        let salt: u64 = rand::random();
        let mut hasher = Sha256::new();
        hasher.update(source.as_str().as_bytes());
        hasher.update(nanos.to_be_bytes());
        hasher.update(salt.to_be_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("sync_{}_{}", source, &digest[..16])
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the job to `next`, stamping timestamps.
    pub fn advance(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        if next == JobStatus::Completed {
            self.progress = 100;
        }
        Ok(())
    }

    /// Transition to `failed` with a message.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.advance(JobStatus::Failed, now)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Record that another `saved` items were persisted.
    pub fn record_progress(&mut self, saved: usize, now: DateTime<Utc>) {
        self.completed_items = (self.completed_items + saved).min(self.total_items);
        self.progress = if self.total_items == 0 {
            100
        } else {
            ((self.completed_items * 100) / self.total_items) as u8
        };
        self.updated_at = now;
    }
}
