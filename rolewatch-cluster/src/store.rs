//! Durable storage for the last known primary of each cluster
//!
//! The stored value is a single plain string, the host of the primary.
//! A key that was never written reads as the empty string.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::time::{timeout, Duration};

use rolewatch_core::config::{StateBackend, StateConfig};

use crate::error::{Error, Result};

/// Timeout for Redis operations in seconds
const REDIS_TIMEOUT_SECS: u64 = 5;

/// Key/value persistence for transition tracking
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the value for `key`; missing keys yield an empty string
    async fn read(&self, key: &str) -> Result<String>;

    /// Replace the value for `key`
    async fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Open the store selected in the configuration
pub fn open_store(config: &StateConfig) -> Result<Arc<dyn DurableStore>> {
    match config.backend {
        StateBackend::File => Ok(Arc::new(FileStore::new(&config.dir))),
        StateBackend::Redis => Ok(Arc::new(RedisStore::new(&config.redis_url, &config.key_prefix)?)),
    }
}

/// One file per key, `<dir>/last_<key>`
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("last_{key}"))
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn read(&self, key: &str) -> Result<String> {
        let path = self.path(key);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content.lines().next().unwrap_or_default().trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::Store(format!("Failed to read {}: {e}", path.display()))),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path(key);
        // Write-then-rename, a reader never sees a half written record
        let tmp = self.dir.join(format!(".last_{key}.tmp"));

        fs::write(&tmp, value)
            .await
            .map_err(|e| Error::Store(format!("Failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Store(format!("Failed to replace {}: {e}", path.display())))?;

        tracing::trace!(path = %path.display(), value, "Stored record");
        Ok(())
    }
}

/// Records kept as plain Redis strings under `<prefix><key>`
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Configuration(format!("Invalid Redis URL for state store: {e}")))?;

        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Store("Redis connection timed out".to_string()))?
        .map_err(|e| Error::Store(format!("Redis connection failed: {e}")))
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn read(&self, key: &str) -> Result<String> {
        let mut conn = self.connection().await?;

        let value: Option<String> = timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            redis::cmd("GET")
                .arg(self.record_key(key))
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| Error::Store("Redis GET timed out".to_string()))?
        .map_err(|e| Error::Store(format!("Redis GET failed: {e}")))?;

        Ok(value.unwrap_or_default())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            redis::cmd("SET")
                .arg(self.record_key(key))
                .arg(value)
                .query_async::<()>(&mut conn),
        )
        .await
        .map_err(|_| Error::Store("Redis SET timed out".to_string()))?
        .map_err(|e| Error::Store(format!("Redis SET failed: {e}")))?;

        Ok(())
    }
}

/// Process-local store, forgets everything on restart
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<String> {
        Ok(self.records.lock().get(key).cloned().unwrap_or_default())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.records.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
