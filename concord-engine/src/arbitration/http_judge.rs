//! Judge backed by an HTTP endpoint
//!
//! POSTs `{"prompt": ..., "request": ...}` and expects a [`RawVerdict`] JSON
//! body. The arbitrator applies its own timeout on top of the client's.

use super::judge::{render_prompt, Judge, JudgeError, JudgeRequest, RawVerdict};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("concord/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct JudgeCall<'a> {
    prompt: String,
    request: &'a JudgeRequest,
}

/// External judge over HTTP
pub struct HttpJudge {
    name: String,
    endpoint: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpJudge {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, JudgeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| JudgeError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            timeout,
            http_client,
        })
    }
}

#[async_trait]
impl Judge for HttpJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<RawVerdict, JudgeError> {
        debug!(
            endpoint = %self.endpoint,
            decision_id = %request.decision_id,
            "Calling HTTP judge"
        );

        let body = JudgeCall {
            prompt: render_prompt(request),
            request,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JudgeError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    JudgeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(JudgeError::Transport(format!("HTTP {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| JudgeError::Malformed(e.to_string()))
    }
}
