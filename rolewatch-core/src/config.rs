use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub poller: PollerConfig,
    pub exporter: ExporterConfig,
    pub state: StateConfig,
    pub pg_cluster: Option<PgClusterConfig>,
    pub redis_cluster: Option<RedisClusterConfig>,
    pub redis_queues: Option<RedisQueuesConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Scheduling of polling cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Seconds between two polling cycles
    pub interval_seconds: u64,
    /// Upper bound for a single node probe
    pub probe_timeout_seconds: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            probe_timeout_seconds: 5,
        }
    }
}

/// Prometheus `/metrics` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 9187,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    File,
    Redis,
}

/// Where the last known primary of every cluster is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    /// Directory holding one `last_<key>` file per cluster (file backend)
    pub dir: String,
    /// Redis URL (redis backend)
    pub redis_url: String,
    /// Key prefix (redis backend)
    pub key_prefix: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            dir: "/tmp".to_string(),
            redis_url: String::new(),
            key_prefix: "rolewatch:".to_string(),
        }
    }
}

/// A PostgreSQL cluster member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgNodeConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    /// Port of the governor-style HTTP status endpoint
    #[serde(default = "default_status_port")]
    pub status_port: u16,
}

const fn default_pg_port() -> u16 {
    5432
}

const fn default_status_port() -> u16 {
    15432
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgClusterConfig {
    pub nodes: Vec<PgNodeConfig>,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Virtual endpoint in front of the cluster (load balancer, VIP)
    pub cluster_host: String,
    pub cluster_port: u16,
    /// Status code the HTTP endpoint answers with on a replica
    pub replica_status_code: u16,
}

impl Default for PgClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            cluster_host: "localhost".to_string(),
            cluster_port: default_pg_port(),
            replica_status_code: 502,
        }
    }
}

/// A Redis node watched through its co-located sentinel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelNodeConfig {
    pub host: String,
    #[serde(default = "default_sentinel_port")]
    pub sentinel_port: u16,
}

const fn default_sentinel_port() -> u16 {
    26379
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisClusterConfig {
    pub nodes: Vec<SentinelNodeConfig>,
    pub master_name: String,
    pub password: String,
    /// Database used for the write/read check against the master
    pub test_db: i64,
}

impl Default for RedisClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            master_name: "redis-master".to_string(),
            password: String::new(),
            test_db: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisQueuesConfig {
    pub nodes: Vec<SentinelNodeConfig>,
    pub master_name: String,
    pub password: String,
    pub db: i64,
    pub queues: Vec<String>,
}

impl Default for RedisQueuesConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            master_name: "redis-master".to_string(),
            password: String::new(),
            db: 5,
            queues: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // ROLEWATCH_POLLER__INTERVAL_SECONDS, ROLEWATCH_STATE__DIR, ...
        builder = builder.add_source(
            Environment::with_prefix("ROLEWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Exporter listen address
    #[must_use]
    pub fn exporter_address(&self) -> String {
        format!("{}:{}", self.exporter.host, self.exporter.port)
    }

    /// Whether at least one polling job is configured
    #[must_use]
    pub const fn has_jobs(&self) -> bool {
        self.pg_cluster.is_some() || self.redis_cluster.is_some() || self.redis_queues.is_some()
    }

    /// Check the configuration for values that would make polling meaningless
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.poller.interval_seconds == 0 {
            errors.push("poller.interval_seconds must be greater than 0".to_string());
        }
        if self.poller.probe_timeout_seconds == 0 {
            errors.push("poller.probe_timeout_seconds must be greater than 0".to_string());
        }
        if self.state.backend == StateBackend::Redis && self.state.redis_url.is_empty() {
            errors.push("state.redis_url is required for the redis state backend".to_string());
        }
        if self.state.backend == StateBackend::File && self.state.dir.is_empty() {
            errors.push("state.dir is required for the file state backend".to_string());
        }

        if let Some(pg) = &self.pg_cluster {
            if pg.nodes.is_empty() {
                errors.push("pg_cluster.nodes must not be empty".to_string());
            }
            if pg.nodes.iter().any(|n| n.host.is_empty()) {
                errors.push("pg_cluster.nodes[].host must not be empty".to_string());
            }
        }

        if let Some(redis) = &self.redis_cluster {
            if redis.nodes.is_empty() {
                errors.push("redis_cluster.nodes must not be empty".to_string());
            }
            if redis.master_name.is_empty() {
                errors.push("redis_cluster.master_name must not be empty".to_string());
            }
        }

        if let Some(queues) = &self.redis_queues {
            if queues.nodes.is_empty() {
                errors.push("redis_queues.nodes must not be empty".to_string());
            }
            if queues.master_name.is_empty() {
                errors.push("redis_queues.master_name must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
