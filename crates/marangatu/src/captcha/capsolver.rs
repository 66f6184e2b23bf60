//! Capsolver backend (paid).
//!
//! `createTask` with a `ReCaptchaV2TaskProxyless` task, then
//! `getTaskResult` until `status` is `ready` or `failed`. A non-zero
//! `errorId` on either call ends the attempt.

use super::{CaptchaSolver, TaskStatus};
use crate::error::SolverError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const CAPSOLVER_API: &str = "https://api.capsolver.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    error_id: i64,
    error_code: Option<String>,
    error_description: Option<String>,
    task_id: Option<String>,
    status: Option<String>,
    solution: Option<Value>,
}

impl Envelope {
    fn error_reason(&self) -> String {
        format!(
            "{} - {}",
            self.error_code.as_deref().unwrap_or("UNKNOWN"),
            self.error_description.as_deref().unwrap_or("Unknown error")
        )
    }
}

pub struct CapsolverClient {
    http: reqwest::Client,
    timeout: Duration,
    api_key: String,
    base_url: String,
}

impl CapsolverClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SolverError> {
        Self::with_base_url(api_key, CAPSOLVER_API)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SolverError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            timeout: REQUEST_TIMEOUT,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Per-request deadline for calls to the provider.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, endpoint: &str, payload: Value) -> Result<Envelope, SolverError> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| SolverError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl CaptchaSolver for CapsolverClient {
    fn name(&self) -> &str {
        "capsolver"
    }

    async fn create_task(&self, site_url: &str, site_key: &str) -> Result<String, SolverError> {
        let envelope = self
            .call(
                "createTask",
                json!({
                    "clientKey": self.api_key,
                    "task": {
                        "type": "ReCaptchaV2TaskProxyless",
                        "websiteURL": site_url,
                        "websiteKey": site_key,
                    }
                }),
            )
            .await?;

        if envelope.error_id != 0 {
            return Err(SolverError::Rejected {
                provider: self.name().into(),
                reason: envelope.error_reason(),
            });
        }
        envelope
            .task_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SolverError::InvalidResponse("no task id returned".into()))
    }

    async fn poll(&self, task_id: &str) -> Result<TaskStatus, SolverError> {
        let envelope = self
            .call(
                "getTaskResult",
                json!({ "clientKey": self.api_key, "taskId": task_id }),
            )
            .await?;

        if envelope.error_id != 0 {
            return Err(SolverError::Rejected {
                provider: self.name().into(),
                reason: envelope.error_reason(),
            });
        }

        match envelope.status.as_deref() {
            Some("ready") => envelope
                .solution
                .as_ref()
                .and_then(|s| s.get("gRecaptchaResponse"))
                .and_then(Value::as_str)
                .map(|t| TaskStatus::Solved(t.to_string()))
                .ok_or_else(|| SolverError::InvalidResponse("ready without solution".into())),
            Some("failed") => Ok(TaskStatus::Failed("task failed".into())),
            Some("processing") | Some("idle") | None => Ok(TaskStatus::Pending),
            Some(other) => {
                tracing::debug!(status = other, "unknown capsolver status");
                Ok(TaskStatus::Pending)
            }
        }
    }
}
