//! NopeCHA token API. Works without a key on the free tier.

use super::{CaptchaSolver, TaskStatus};
use crate::error::SolverError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const NOPECHA_API: &str = "https://api.nopecha.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error code returned while a job is still being worked on.
const INCOMPLETE_JOB: i64 = 14;

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Value>,
    error: Option<i64>,
    message: Option<String>,
}

impl Envelope {
    fn reason(&self, code: i64) -> String {
        format!(
            "error {code}: {}",
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

pub struct NopechaClient {
    http: reqwest::Client,
    timeout: Duration,
    api_key: Option<String>,
    base_url: String,
}

impl NopechaClient {
    pub fn new(api_key: Option<String>) -> Result<Self, SolverError> {
        Self::with_base_url(api_key, NOPECHA_API)
    }

    pub fn with_base_url(
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SolverError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            timeout: REQUEST_TIMEOUT,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Per-request deadline for calls to the provider.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/token/", self.base_url)
    }

    async fn parse(resp: reqwest::Response) -> Result<Envelope, SolverError> {
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| SolverError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl CaptchaSolver for NopechaClient {
    fn name(&self) -> &str {
        "nopecha"
    }

    async fn create_task(&self, site_url: &str, site_key: &str) -> Result<String, SolverError> {
        let mut payload = json!({
            "type": "recaptcha2",
            "sitekey": site_key,
            "url": site_url,
        });
        if let (Some(key), Some(obj)) = (&self.api_key, payload.as_object_mut()) {
            obj.insert("key".into(), Value::String(key.clone()));
        }

        let resp = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;
        let envelope = Self::parse(resp).await?;

        if let Some(code) = envelope.error {
            return Err(SolverError::Rejected {
                provider: self.name().into(),
                reason: envelope.reason(code),
            });
        }
        envelope
            .data
            .as_ref()
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SolverError::InvalidResponse("no job id returned".into()))
    }

    async fn poll(&self, task_id: &str) -> Result<TaskStatus, SolverError> {
        let mut query = vec![("id", task_id)];
        if let Some(key) = &self.api_key {
            query.push(("key", key.as_str()));
        }

        let resp = self
            .http
            .get(self.endpoint())
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await?;
        let envelope = Self::parse(resp).await?;

        match envelope.error {
            Some(INCOMPLETE_JOB) => return Ok(TaskStatus::Pending),
            Some(code) => return Ok(TaskStatus::Failed(envelope.reason(code))),
            None => {}
        }

        match envelope.data.as_ref().and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(TaskStatus::Solved(token.to_string())),
            _ => Ok(TaskStatus::Pending),
        }
    }
}
