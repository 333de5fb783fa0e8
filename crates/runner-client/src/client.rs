//! Control plane callback client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::CallbackError;

pub const CALLBACK_TOKEN_HEADER: &str = "X-Callback-Token";

/// States a runner is allowed to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Running,
    Completed,
    Failed,
}

/// Body of `POST /executions/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_notebook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl StatusReport {
    fn new(status: ReportStatus) -> Self {
        Self {
            status,
            error: None,
            output_notebook: None,
            output_html: None,
            outputs: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn running(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start_time),
            ..Self::new(ReportStatus::Running)
        }
    }

    pub fn completed(
        output_notebook: impl Into<String>,
        output_html: Option<String>,
        outputs: Option<Value>,
    ) -> Self {
        Self {
            output_notebook: Some(output_notebook.into()),
            output_html,
            outputs,
            end_time: Some(Utc::now()),
            ..Self::new(ReportStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            end_time: Some(Utc::now()),
            ..Self::new(ReportStatus::Failed)
        }
    }
}

/// Exponential backoff bounds for [`CallbackClient::report_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// HTTP client for runner status callbacks.
#[derive(Clone)]
pub struct CallbackClient {
    client: reqwest::Client,
    api_url: String,
    execution_id: Uuid,
    token: String,
    retry: RetryPolicy,
}

impl CallbackClient {
    /// Create a new callback client.
    pub fn new(api_url: &str, execution_id: Uuid, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            execution_id,
            token: token.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(&config.api_url, config.job_id, config.callback_token.clone())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn status_url(&self) -> String {
        format!("{}/executions/{}/status", self.api_url, self.execution_id)
    }

    /// Send one report.
    pub async fn report(&self, report: &StatusReport) -> Result<(), CallbackError> {
        let response = self
            .client
            .post(self.status_url())
            .header(CALLBACK_TOKEN_HEADER, &self.token)
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(CallbackError::Status {
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        Ok(())
    }

    /// Send a report, retrying transport errors, 429 and 5xx answers.
    ///
    /// A `Retry-After` from the server stretches the wait up to `max_delay`.
    pub async fn report_with_retry(&self, report: &StatusReport) -> Result<(), CallbackError> {
        let mut delay = self.retry.initial_delay;
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.report(report).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let wait = e
                        .retry_after()
                        .map_or(delay, |requested| requested.min(self.retry.max_delay).max(delay));
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        status = ?report.status,
                        error = %e,
                        wait_ms = wait.as_millis() as u64,
                        "Status callback failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay = std::cmp::min(delay * 2, self.retry.max_delay);
                }
                Err(e) => return Err(e),
            }
        }

        Err(CallbackError::Config(
            "retry policy allowed no attempts".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        attempts: Arc<AtomicUsize>,
        fail_first: usize,
        fail_with: Option<u16>,
        seen: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn handle(
        State(recorder): State<Recorder>,
        Path(id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        let attempt = recorder.attempts.fetch_add(1, Ordering::SeqCst);
        let token = headers
            .get("x-callback-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        recorder.seen.lock().unwrap().push((id, token, body));
        match recorder.fail_with {
            Some(429) if attempt < recorder.fail_first => {
                (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "1")]).into_response()
            }
            Some(code) if attempt < recorder.fail_first => {
                StatusCode::from_u16(code).unwrap().into_response()
            }
            _ => StatusCode::OK.into_response(),
        }
    }

    async fn serve(recorder: Recorder) -> String {
        let app = Router::new()
            .route("/api/v1/executions/{id}/status", post(handle))
            .with_state(recorder);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/v1", addr)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_report_sends_token_and_body() {
        let recorder = Recorder::default();
        let api_url = serve(recorder.clone()).await;
        let id = Uuid::new_v4();

        let client = CallbackClient::new(&api_url, id, "secret-token");
        client
            .report(&StatusReport::running(Utc::now()))
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, id.to_string());
        assert_eq!(seen[0].1.as_deref(), Some("secret-token"));
        assert_eq!(seen[0].2["status"], "running");
        assert!(seen[0].2.get("error").is_none());
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let recorder = Recorder {
            fail_first: 2,
            fail_with: Some(503),
            ..Default::default()
        };
        let api_url = serve(recorder.clone()).await;
        let client =
            CallbackClient::new(&api_url, Uuid::new_v4(), "t").with_retry_policy(fast_retry());

        client
            .report_with_retry(&StatusReport::failed("kernel died"))
            .await
            .unwrap();
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_report_is_retried() {
        let recorder = Recorder {
            fail_first: 2,
            fail_with: Some(429),
            ..Default::default()
        };
        let api_url = serve(recorder.clone()).await;
        let client =
            CallbackClient::new(&api_url, Uuid::new_v4(), "t").with_retry_policy(fast_retry());

        client
            .report_with_retry(&StatusReport::completed("outputs/x/out.ipynb", None, None))
            .await
            .unwrap();
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 3);

        let seen = recorder.seen.lock().unwrap();
        assert!(seen.iter().all(|(_, _, body)| body["status"] == "completed"));
    }

    #[tokio::test]
    async fn test_status_error_carries_retry_after() {
        let recorder = Recorder {
            fail_first: usize::MAX,
            fail_with: Some(429),
            ..Default::default()
        };
        let api_url = serve(recorder.clone()).await;
        let err = CallbackClient::new(&api_url, Uuid::new_v4(), "t")
            .report(&StatusReport::failed("kernel died"))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let recorder = Recorder {
            fail_first: usize::MAX,
            fail_with: Some(401),
            ..Default::default()
        };
        let api_url = serve(recorder.clone()).await;
        let client =
            CallbackClient::new(&api_url, Uuid::new_v4(), "t").with_retry_policy(fast_retry());

        let err = client
            .report_with_retry(&StatusReport::completed("outputs/x/out.ipynb", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackError::Status { status: 401, .. }));
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let recorder = Recorder {
            fail_first: usize::MAX,
            fail_with: Some(500),
            ..Default::default()
        };
        let api_url = serve(recorder.clone()).await;
        let client =
            CallbackClient::new(&api_url, Uuid::new_v4(), "t").with_retry_policy(fast_retry());

        let err = client
            .report_with_retry(&StatusReport::running(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackError::Status { status: 500, .. }));
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_report_constructors() {
        let failed = StatusReport::failed("boom");
        assert_eq!(failed.status, ReportStatus::Failed);
        assert!(failed.end_time.is_some());

        let json = serde_json::to_value(StatusReport::completed(
            "outputs/1/report.ipynb",
            Some("outputs/1/report.html".into()),
            Some(serde_json::json!({"rows": 3})),
        ))
        .unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["outputs"]["rows"], 3);
    }
}
