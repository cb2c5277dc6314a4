//! Stock monitor record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stock status of a watched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorStatus {
    #[default]
    Unknown,
    InStock,
    OutOfStock,
    Error,
    Checking,
    Pending,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Unknown => "unknown",
            MonitorStatus::InStock => "in-stock",
            MonitorStatus::OutOfStock => "out-of-stock",
            MonitorStatus::Error => "error",
            MonitorStatus::Checking => "checking",
            MonitorStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished check found.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    /// The page was fetched and classified
    Verdict(MonitorStatus),
    /// Fetch or classification failed with this message
    Failed(String),
}

/// A user-registered URL watched for availability changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    pub id: String,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub url: String,

    /// Custom text whose presence means "in stock"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,

    #[serde(default)]
    pub status: MonitorStatus,

    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Baseline check interval in minutes
    pub check_frequency: i64,

    #[serde(default)]
    pub consecutive_errors: u32,

    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_seen_in_stock: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set while a check is in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_started_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Monitor {
    /// Create a pending, active monitor.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        check_frequency: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            url: url.into(),
            target_text: None,
            status: MonitorStatus::Pending,
            is_active: true,
            check_frequency,
            consecutive_errors: 0,
            last_checked: None,
            last_seen_in_stock: None,
            error_message: None,
            check_started_at: None,
            created_at: now,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_text = Some(target.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Apply a successful check result.
    pub fn record_success(&mut self, status: MonitorStatus, now: DateTime<Utc>) {
        self.status = status;
        self.last_checked = Some(now);
        if status == MonitorStatus::InStock {
            self.last_seen_in_stock = Some(now);
        }
        self.consecutive_errors = 0;
        self.error_message = None;
        self.check_started_at = None;
    }

    /// Apply a failed check result.
    pub fn record_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = MonitorStatus::Error;
        self.last_checked = Some(now);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.error_message = Some(message.into());
        self.check_started_at = None;
    }

    /// Apply a check result, leaving user-editable fields alone.
    pub fn apply_check(&mut self, result: &CheckResult, now: DateTime<Utc>) {
        match result {
            CheckResult::Verdict(status) => self.record_success(*status, now),
            CheckResult::Failed(message) => self.record_failure(message.clone(), now),
        }
    }

    /// Manual reset of the error streak.
    pub fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
        self.error_message = None;
        if self.status == MonitorStatus::Error {
            self.status = MonitorStatus::Unknown;
        }
    }

    /// Label for log lines.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_success_resets_errors() {
        let mut monitor = Monitor::new("m1", "https://shop.example/item", 30, now());
        monitor.record_failure("timeout", now());
        monitor.record_failure("timeout", now());
        assert_eq!(monitor.consecutive_errors, 2);

        monitor.record_success(MonitorStatus::OutOfStock, now());
        assert_eq!(monitor.consecutive_errors, 0);
        assert!(monitor.error_message.is_none());
        assert!(monitor.last_seen_in_stock.is_none());
    }

    #[test]
    fn test_in_stock_stamps_last_seen() {
        let mut monitor = Monitor::new("m1", "https://shop.example/item", 30, now());
        monitor.record_success(MonitorStatus::InStock, now());
        assert_eq!(monitor.last_seen_in_stock, Some(now()));
    }

    #[test]
    fn test_apply_check_keeps_user_fields() {
        let mut monitor = Monitor::new("m1", "https://shop.example/item", 30, now());
        monitor.is_active = false;
        monitor.check_frequency = 90;
        monitor.apply_check(&CheckResult::Failed("HTTP 503".into()), now());
        assert!(!monitor.is_active);
        assert_eq!(monitor.check_frequency, 90);
        assert_eq!(monitor.consecutive_errors, 1);
        assert_eq!(monitor.status, MonitorStatus::Error);
    }

    #[test]
    fn test_reset_errors() {
        let mut monitor = Monitor::new("m1", "https://shop.example/item", 30, now());
        monitor.record_failure("HTTP 503", now());
        monitor.reset_errors();
        assert_eq!(monitor.consecutive_errors, 0);
        assert_eq!(monitor.status, MonitorStatus::Unknown);
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_string(&MonitorStatus::OutOfStock).unwrap(),
            "\"out-of-stock\""
        );
    }
}
