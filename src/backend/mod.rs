//! Key-value backends
//!
//! A backend executes one typed [`Command`] at a time and answers with a
//! JSON value. The engines and the proxy only ever see `dyn KvBackend`, so
//! the concrete store is chosen once at startup and passed in explicitly.

pub mod memory;
pub mod redis;
pub mod rest;

use crate::command::{Command, CommandError};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;
pub use self::rest::RestBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid expire time")]
    InvalidExpire,

    #[error("ERR string exceeds maximum allowed size")]
    TooLarge,

    #[error("ERR invalid pattern: {0}")]
    Pattern(String),

    #[error("redis: {0}")]
    Redis(String),

    #[error("http: {0}")]
    Http(String),

    /// Error reported by the remote end of a REST backend
    #[error("{0}")]
    Remote(String),
}

#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Execute a single command
    async fn execute(&self, command: &Command) -> Result<Value, BackendError>;

    /// Short name used in logs and health output
    fn name(&self) -> &'static str;

    /// Round-trip no-op against the store
    async fn ping(&self) -> Result<(), BackendError> {
        self.execute(&Command::Ping { message: None }).await.map(|_| ())
    }
}
