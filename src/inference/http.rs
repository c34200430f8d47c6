//! OpenAI-compatible chat-completions client.

use super::{InferenceClient, InferenceOptions};
use crate::errors::InferenceError;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
    request_timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            max_retries: 3,
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn invoke_once(&self, body: &Value) -> Result<String, InferenceError> {
        let mut request = self
            .http
            .post(self.endpoint())
            .timeout(self.request_timeout)
            .json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    after_ms: self.request_timeout.as_millis() as u64,
                }
            } else {
                InferenceError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InferenceError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(format!("response is not JSON: {}", e)))?;
        extract_content(&payload)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn extract_content(payload: &Value) -> Result<String, InferenceError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InferenceError::Malformed("response has no message content".to_string()))
}

/// Back-off before retry number `attempt` (0-based): 1s, 2s, 4s, ...
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

#[async_trait]
impl InferenceClient for ChatCompletionsClient {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &InferenceOptions,
    ) -> Result<String, InferenceError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        tracing::debug!(
            stage = %options.stage,
            prompt_chars = system_prompt.chars().count() + user_prompt.chars().count(),
            "Sending inference request"
        );

        let mut attempt = 0;
        loop {
            match self.invoke_once(&body).await {
                Ok(content) => return Ok(content),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let wait = backoff(attempt);
                    tracing::warn!(
                        stage = %options.stage,
                        attempt = attempt + 1,
                        wait_secs = wait.as_secs(),
                        error = %err,
                        "Inference failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
