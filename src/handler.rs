// src/handler.rs

//! Request/response contract for the sync and monitor-check endpoints.
//!
//! Framework-agnostic: callers hand in the decoded JSON body and get back a
//! status code, optional `Retry-After` value and JSON body to send.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::AppError;
use crate::models::{MonitorStatus, Source};
use crate::pipeline::{MonitorScheduler, SyncEngine};

/// Response to hand back to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Seconds for the `Retry-After` header
    pub retry_after: Option<u64>,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body,
        }
    }

    fn from_error(error: &AppError) -> Self {
        let mut body = json!({ "success": false, "error": error.to_string() });
        if let AppError::Conflict { job_id } = error {
            body["jobId"] = json!(job_id);
        }
        let retry_after = error.retry_after();
        if let Some(secs) = retry_after {
            body["retryAfter"] = json!(secs);
        }
        Self {
            status: error.status_code(),
            retry_after,
            body,
        }
    }

    /// Extra headers to send with the body.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Type", "application/json".to_string())];
        if let Some(secs) = self.retry_after {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }
}

/// Body of a sync request: either start a job or poll one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SyncRequest {
    Status {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Start {
        source: String,
        #[serde(rename = "accessKey", default)]
        access_key: String,
    },
}

/// Body of a manual monitor check.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub id: String,
    pub url: String,
    #[serde(rename = "targetText", default)]
    pub target_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub success: bool,
    pub status: MonitorStatus,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Start a sync (`{source, accessKey}`) or read a job (`{jobId}`).
pub async fn handle_sync(engine: &Arc<SyncEngine>, body: &Value) -> ApiResponse {
    let request: SyncRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(e) => {
            return ApiResponse::from_error(&AppError::validation(format!(
                "Invalid sync request: {e}"
            )));
        }
    };

    match request {
        SyncRequest::Start { source, access_key } => {
            let result = match source.parse::<Source>() {
                Ok(source) => engine.request_sync(source, &access_key).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(ticket) => ApiResponse::ok(json!({ "success": true, "jobId": ticket.job_id })),
                Err(e) => {
                    log::info!("Sync request for '{}' refused: {}", source, e);
                    ApiResponse::from_error(&e)
                }
            }
        }
        SyncRequest::Status { job_id } => match engine.get_status(&job_id).await {
            Ok(job) => ApiResponse::ok(json!({ "success": true, "job": job })),
            Err(e) => ApiResponse::from_error(&e),
        },
    }
}

/// Run a manual check. Always answers 200; failures travel in the body.
pub async fn handle_check(scheduler: &MonitorScheduler, body: &Value) -> ApiResponse {
    let response = match serde_json::from_value::<CheckRequest>(body.clone()) {
        Ok(request) => run_check(scheduler, &request).await,
        Err(e) => CheckResponse {
            success: false,
            status: MonitorStatus::Error,
            checked_at: scheduler.now(),
            error_message: Some(format!("Invalid check request: {e}")),
        },
    };

    match serde_json::to_value(&response) {
        Ok(body) => ApiResponse::ok(body),
        Err(e) => ApiResponse::ok(json!({ "success": false, "error": e.to_string() })),
    }
}

async fn run_check(scheduler: &MonitorScheduler, request: &CheckRequest) -> CheckResponse {
    let result = scheduler
        .manual_check(&request.id, &request.url, request.target_text.as_deref())
        .await;

    match result {
        Ok(outcome) => CheckResponse {
            success: !outcome.is_error(),
            status: outcome.status,
            checked_at: outcome.checked_at,
            error_message: outcome.error_message,
        },
        Err(e) => CheckResponse {
            success: false,
            status: match e {
                AppError::Busy(_) => MonitorStatus::Checking,
                _ => MonitorStatus::Error,
            },
            checked_at: scheduler.now(),
            error_message: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{RateLimiter, TtlCache};
    use crate::error::{CONFLICT_RETRY_SECS, Result};
    use crate::models::{CatalogSet, ClassifierRules, Monitor, SchedulerConfig, SyncConfig};
    use crate::services::{CatalogSource, FetchedPage, PageFetcher, StockClassifier};
    use crate::storage::{LocalStorage, MonitorStore};
    use crate::utils::clock::{Clock, ManualClock};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct GatedSource(Arc<Notify>);

    #[async_trait]
    impl CatalogSource for GatedSource {
        fn source(&self) -> Source {
            Source::Mtg
        }

        async fn fetch(&self) -> Result<Vec<CatalogSet>> {
            self.0.notified().await;
            Ok(vec![CatalogSet::new(Source::Mtg, "neo", "Kamigawa: Neon Dynasty")])
        }
    }

    struct StaticFetcher;

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            if url.contains("down") {
                return Err(AppError::upstream(url, "HTTP 502"));
            }
            Ok(FetchedPage {
                status: 200,
                body: "<html><body><button>Add to Cart</button></body></html>".into(),
            })
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new("2026-03-01T12:00:00Z".parse().unwrap()))
    }

    fn sync_engine(gate: Arc<Notify>) -> Arc<SyncEngine> {
        let clock = clock();
        let limiter = RateLimiter::new(Arc::new(TtlCache::new(clock.clone())), clock.clone());
        let source: Arc<dyn CatalogSource> = Arc::new(GatedSource(gate));
        let config = SyncConfig {
            access_key: "letmein".into(),
            ..SyncConfig::default()
        };
        Arc::new(SyncEngine::new(
            Arc::new(LocalStorage::in_memory()),
            vec![source],
            config,
            clock,
            limiter,
        ))
    }

    #[tokio::test]
    async fn test_sync_flow_status_codes() {
        let gate = Arc::new(Notify::new());
        let engine = sync_engine(gate.clone());

        let denied = handle_sync(&engine, &json!({"source": "mtg", "accessKey": "nope"})).await;
        assert_eq!(denied.status, 401);
        assert_eq!(denied.body["success"], json!(false));

        let started = handle_sync(&engine, &json!({"source": "mtg", "accessKey": "letmein"})).await;
        assert_eq!(started.status, 200);
        let job_id = started.body["jobId"].as_str().unwrap().to_string();

        let duplicate =
            handle_sync(&engine, &json!({"source": "MTG", "accessKey": "letmein"})).await;
        assert_eq!(duplicate.status, 429);
        assert_eq!(duplicate.body["jobId"], json!(job_id));
        assert_eq!(duplicate.body["retryAfter"], json!(CONFLICT_RETRY_SECS));
        assert!(
            duplicate
                .headers()
                .contains(&("Retry-After", CONFLICT_RETRY_SECS.to_string()))
        );

        let status = handle_sync(&engine, &json!({"jobId": job_id})).await;
        assert_eq!(status.status, 200);
        assert_eq!(status.body["job"]["source"], json!("mtg"));

        gate.notify_one();
        let mut finished = false;
        for _ in 0..200 {
            let status = handle_sync(&engine, &json!({"jobId": job_id})).await;
            if status.body["job"]["status"] == json!("completed") {
                finished = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(finished);

        let cooling = handle_sync(&engine, &json!({"source": "mtg", "accessKey": "letmein"})).await;
        assert_eq!(cooling.status, 429);
        assert_eq!(cooling.body["retryAfter"], json!(300));
        assert!(cooling.headers().contains(&("Retry-After", "300".to_string())));
    }

    #[tokio::test]
    async fn test_sync_bad_requests() {
        let engine = sync_engine(Arc::new(Notify::new()));

        let missing = handle_sync(&engine, &json!({"jobId": "sync_mtg_nope"})).await;
        assert_eq!(missing.status, 404);

        let bad_source =
            handle_sync(&engine, &json!({"source": "digimon", "accessKey": "letmein"})).await;
        assert_eq!(bad_source.status, 400);

        let garbage = handle_sync(&engine, &json!({"hello": 1})).await;
        assert_eq!(garbage.status, 400);
        assert!(garbage.headers().iter().all(|(name, _)| *name != "Retry-After"));
    }

    #[tokio::test]
    async fn test_check_always_200() {
        let clock = clock();
        let store = Arc::new(LocalStorage::in_memory());
        store
            .save_monitor(&Monitor::new("m1", "https://shop.example/box", 30, clock.now()))
            .await
            .unwrap();
        let scheduler = MonitorScheduler::new(
            store,
            Arc::new(StaticFetcher),
            Arc::new(StockClassifier::new(ClassifierRules::default()).unwrap()),
            SchedulerConfig::default(),
            clock,
        );

        let ok = handle_check(
            &scheduler,
            &json!({"id": "m1", "url": "https://shop.example/box"}),
        )
        .await;
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body["success"], json!(true));
        assert_eq!(ok.body["status"], json!("in-stock"));
        assert!(ok.body.get("error_message").is_none());

        let down = handle_check(
            &scheduler,
            &json!({"id": "m1", "url": "https://down.example/box"}),
        )
        .await;
        assert_eq!(down.status, 200);
        assert_eq!(down.body["success"], json!(false));
        assert_eq!(down.body["status"], json!("error"));
        assert!(down.body["error_message"].as_str().unwrap().contains("HTTP 502"));

        let unknown = handle_check(&scheduler, &json!({"id": "zz", "url": "https://x.example"})).await;
        assert_eq!(unknown.status, 200);
        assert_eq!(unknown.body["success"], json!(false));

        let invalid = handle_check(&scheduler, &json!({"url": 5})).await;
        assert_eq!(invalid.status, 200);
        assert_eq!(invalid.body["status"], json!("error"));
    }
}
