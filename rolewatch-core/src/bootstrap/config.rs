//! Configuration loading

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::Config;

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. Explicit path (`--config` / `ROLEWATCH_CONFIG_PATH`)
/// 2. ./rolewatch.yaml (current working directory)
/// 3. /etc/rolewatch/rolewatch.yaml
/// 4. Fall back to environment variables only
///
/// Runs before logging is initialized, so progress goes to stderr.
pub fn load_config(explicit_path: Option<&str>) -> Result<Config> {
    let config_path = explicit_path
        .map(str::to_string)
        .or_else(|| std::env::var("ROLEWATCH_CONFIG_PATH").ok())
        .or_else(|| existing("rolewatch.yaml"))
        .or_else(|| existing("/etc/rolewatch/rolewatch.yaml"));

    let config = if let Some(path) = config_path {
        if !Path::new(&path).exists() {
            return Err(anyhow::anyhow!("Config file {path} does not exist"));
        }
        eprintln!("Loading config from {path}");
        Config::from_file(&path).map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    if !config.has_jobs() {
        return Err(anyhow::anyhow!(
            "No cluster configured: set at least one of pg_cluster, redis_cluster, redis_queues"
        ));
    }

    info!("Configuration loaded and validated successfully");

    Ok(config)
}

fn existing(path: &str) -> Option<String> {
    Path::new(path).exists().then(|| path.to_string())
}
