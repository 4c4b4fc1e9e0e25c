//! Native Redis backend over a multiplexed async connection

use super::{BackendError, KvBackend};
use crate::command::{Command, Op};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct RedisBackend {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisBackend {
    /// Open a client for `url` and establish the shared connection
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(|e| BackendError::Redis(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BackendError::Redis(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn execute(&self, command: &Command) -> Result<Value, BackendError> {
        let args = command.to_args();
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| BackendError::Redis("empty command".to_string()))?;

        let mut cmd = redis::cmd(name);
        for arg in rest {
            cmd.arg(arg);
        }

        let mut conn = self.conn.clone();
        let raw: redis::Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BackendError::Redis(e.to_string()))?;

        let value = to_json(raw);
        Ok(match command.op() {
            Op::HGetAll => pairs_to_object(value),
            _ => value,
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn to_json(raw: redis::Value) -> Value {
    match raw {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(i) => Value::from(i),
        redis::Value::BulkString(bytes) => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::SimpleString(s) => Value::String(s),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        redis::Value::Map(entries) => {
            let mut obj = Map::new();
            for (k, v) in entries {
                let key = match to_json(k) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                obj.insert(key, to_json(v));
            }
            Value::Object(obj)
        }
        redis::Value::Double(d) => Value::from(d),
        redis::Value::Boolean(b) => Value::Bool(b),
        other => Value::String(format!("{:?}", other)),
    }
}

/// RESP2 answers HGETALL with a flat `[field, value, ...]` array
pub(super) fn pairs_to_object(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut obj = Map::new();
            let mut it = items.into_iter();
            while let (Some(k), Some(v)) = (it.next(), it.next()) {
                let key = match k {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                obj.insert(key, v);
            }
            Value::Object(obj)
        }
        other => other,
    }
}
