//! Upstash-compatible REST backend
//!
//! Each command is POSTed as a JSON array to the base URL with a bearer
//! token. The server answers `{"result": ...}` or `{"error": "..."}`. The
//! same protocol is served by `pmkv serve`, so this backend can also talk to
//! a local proxy.

use super::{BackendError, KvBackend};
use crate::command::{Command, Op};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RestBackend {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl RestBackend {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl KvBackend for RestBackend {
    async fn execute(&self, command: &Command) -> Result<Value, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&command.to_args())
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let reply: RestReply = serde_json::from_str(&body).map_err(|_| {
            BackendError::Http(format!("unexpected response ({}): {}", status.as_u16(), body))
        })?;

        if let Some(error) = reply.error {
            return Err(BackendError::Remote(error));
        }
        if !status.is_success() {
            return Err(BackendError::Http(format!("status {}", status.as_u16())));
        }

        let value = reply.result.unwrap_or(Value::Null);
        Ok(match command.op() {
            Op::HGetAll => super::redis::pairs_to_object(value),
            _ => value,
        })
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}
