use scholia_core::hashing::stable_hash;
use scholia_core::metrics::MetricsCollector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub duration_ms: u64,
    pub created_at_ms: u64,
    pub output_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub output: Value,
    pub meta: CacheMeta,
}

impl CacheEntry {
    pub fn new(output: Value, duration_ms: u64, finish_reason: Option<String>) -> Self {
        let output_hash = stable_hash(&output);
        Self {
            output,
            meta: CacheMeta {
                duration_ms,
                created_at_ms: epoch_ms(),
                output_hash,
                finish_reason,
            },
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Write via a sibling temp file then rename. Concurrent writers to the same
/// key race harmlessly: content is identical by construction and the rename
/// is atomic.
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// L1: content-addressed cache of agent outputs at
/// `<root>/.cache/agent_cache/<key>.json`.
pub struct AgentCache {
    dir: PathBuf,
    metrics: MetricsCollector,
}

impl AgentCache {
    pub fn new(root: impl AsRef<Path>, metrics: MetricsCollector) -> Self {
        Self {
            dir: root.as_ref().join(".cache").join("agent_cache"),
            metrics,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let found = read_json(&self.path_for(key)).await?;
        self.metrics.record_agent_cache(found.is_some());
        match found {
            None => Ok(None),
            Some(bytes) => {
                let entry: CacheEntry = serde_json::from_slice(&bytes)
                    .map_err(|err| CacheError::Corrupt(err.to_string()))?;
                Ok(Some(entry))
            }
        }
    }

    pub async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let bytes =
            serde_json::to_vec(entry).map_err(|err| CacheError::Corrupt(err.to_string()))?;
        atomic_write(&self.path_for(key), &bytes).await
    }
}

/// L2: cache of derived artifacts at
/// `<root>/.cache/derived/<artifact_type>/<key>.json`, with hit/miss
/// counters per artifact type.
pub struct DerivedCache {
    dir: PathBuf,
    metrics: MetricsCollector,
}

impl DerivedCache {
    pub fn new(root: impl AsRef<Path>, metrics: MetricsCollector) -> Self {
        Self {
            dir: root.as_ref().join(".cache").join("derived"),
            metrics,
        }
    }

    fn path_for(&self, artifact_type: &str, key: &str) -> PathBuf {
        self.dir.join(artifact_type).join(format!("{key}.json"))
    }

    pub async fn get(&self, artifact_type: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let found = read_json(&self.path_for(artifact_type, key)).await?;
        self.metrics.record_derived_cache(artifact_type, found.is_some());
        match found {
            None => Ok(None),
            Some(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)
                    .map_err(|err| CacheError::Corrupt(err.to_string()))?;
                Ok(Some(value))
            }
        }
    }

    pub async fn put(&self, artifact_type: &str, key: &str, value: &Value) -> Result<(), CacheError> {
        let bytes =
            serde_json::to_vec(value).map_err(|err| CacheError::Corrupt(err.to_string()))?;
        atomic_write(&self.path_for(artifact_type, key), &bytes).await
    }
}
