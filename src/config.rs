use crate::backend::{KvBackend, RedisBackend, RestBackend};
use crate::error::TrackerError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "pmkv.yaml";

/// Tool settings read from `pmkv.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Relative paths resolve against `data_dir`
    pub backup_dir: PathBuf,
    pub listen: String,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backup_dir: PathBuf::from("backups"),
            listen: "127.0.0.1:8079".to_string(),
            max_body_bytes: 1024 * 1024,
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load `explicit` if given, otherwise `<data_dir>/pmkv.yaml` when it
    /// exists, otherwise defaults. A `data_dir` from the command line wins
    /// over the file.
    pub fn resolve(explicit: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let dir = data_dir
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| Settings::default().data_dir);
                let candidate = dir.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Self::load(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        if let Some(dir) = data_dir {
            settings.data_dir = dir.to_path_buf();
        }
        Ok(settings)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(&self.backup_dir)
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.data_dir.join(".locks")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Which key-value store to talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Rest { url: String, token: String },
    Redis { url: String },
}

const REST_VARIABLES: [(&str, &str); 2] = [
    ("UPSTASH_REDIS_REST_URL", "UPSTASH_REDIS_REST_TOKEN"),
    ("KV_REST_API_URL", "KV_REST_API_TOKEN"),
];

const REDIS_VARIABLE: &str = "REDIS_URL";

impl BackendConfig {
    pub fn from_env() -> Result<Self, TrackerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// First complete variable set wins; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TrackerError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        for (url_var, token_var) in REST_VARIABLES {
            if let (Some(url), Some(token)) = (get(url_var), get(token_var)) {
                return Ok(BackendConfig::Rest { url, token });
            }
        }
        if let Some(url) = get(REDIS_VARIABLE) {
            return Ok(BackendConfig::Redis { url });
        }

        Err(TrackerError::Config(format!(
            "no key-value backend configured; set {} + {}, {} + {}, or {}",
            REST_VARIABLES[0].0,
            REST_VARIABLES[0].1,
            REST_VARIABLES[1].0,
            REST_VARIABLES[1].1,
            REDIS_VARIABLE
        )))
    }

    /// Location without credentials
    pub fn describe(&self) -> String {
        match self {
            BackendConfig::Rest { url, .. } => format!("rest {}", url),
            BackendConfig::Redis { url } => match url.rsplit_once('@') {
                Some((_, host)) => format!("redis ***@{}", host),
                None => format!("redis {}", url),
            },
        }
    }

    pub async fn connect(&self, timeout: Duration) -> Result<Arc<dyn KvBackend>, TrackerError> {
        let backend: Arc<dyn KvBackend> = match self {
            BackendConfig::Rest { url, token } => Arc::new(RestBackend::new(url, token, timeout)?),
            BackendConfig::Redis { url } => Arc::new(RedisBackend::connect(url).await?),
        };
        Ok(backend)
    }
}
