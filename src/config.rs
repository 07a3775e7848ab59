use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONTEXT_CACHE_CAPACITY: usize = 512;
const DEFAULT_CONTEXT_TTL_SECS: u64 = 300;
const DEFAULT_ATTRIBUTE_CACHE_TTL_SECS: u64 = 600;
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 32;

/// Engine tuning knobs.
///
/// Resolution order: explicit config file values, then environment
/// variables (`TRACKER_AGGREGATE_*`), then defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of per-user access scopes kept in memory.
    pub context_cache_capacity: usize,
    /// Seconds a cached access scope stays valid.
    pub context_ttl_secs: u64,
    /// Seconds the memoized attribute metadata sets stay valid.
    pub attribute_cache_ttl_secs: u64,
    /// Upper bound on fetch tasks executing at once, shared across all
    /// concurrent `find` calls.
    pub max_concurrent_fetches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_cache_capacity: DEFAULT_CONTEXT_CACHE_CAPACITY,
            context_ttl_secs: DEFAULT_CONTEXT_TTL_SECS,
            attribute_cache_ttl_secs: DEFAULT_ATTRIBUTE_CACHE_TTL_SECS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

impl EngineConfig {
    /// Load configuration, optionally from a YAML or JSON file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_config = if let Some(path) = path {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            context_cache_capacity: file_capacity,
            context_ttl_secs: file_context_ttl,
            attribute_cache_ttl_secs: file_attribute_ttl,
            max_concurrent_fetches: file_max_fetches,
        } = file_config;

        let config = Self {
            context_cache_capacity: file_capacity
                .or(env_usize("TRACKER_AGGREGATE_CONTEXT_CACHE_CAPACITY"))
                .unwrap_or(DEFAULT_CONTEXT_CACHE_CAPACITY),
            context_ttl_secs: file_context_ttl
                .or(env_u64("TRACKER_AGGREGATE_CONTEXT_TTL_SECS"))
                .unwrap_or(DEFAULT_CONTEXT_TTL_SECS),
            attribute_cache_ttl_secs: file_attribute_ttl
                .or(env_u64("TRACKER_AGGREGATE_ATTRIBUTE_CACHE_TTL_SECS"))
                .unwrap_or(DEFAULT_ATTRIBUTE_CACHE_TTL_SECS),
            max_concurrent_fetches: file_max_fetches
                .or(env_usize("TRACKER_AGGREGATE_MAX_CONCURRENT_FETCHES"))
                .unwrap_or(DEFAULT_MAX_CONCURRENT_FETCHES),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.context_cache_capacity > 0,
            "context cache capacity must be at least 1"
        );
        anyhow::ensure!(self.context_ttl_secs > 0, "context TTL must be nonzero");
        anyhow::ensure!(
            self.attribute_cache_ttl_secs > 0,
            "attribute cache TTL must be nonzero"
        );
        anyhow::ensure!(
            self.max_concurrent_fetches > 0,
            "fetch concurrency must be at least 1"
        );
        Ok(())
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn attribute_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.attribute_cache_ttl_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    context_cache_capacity: Option<usize>,
    context_ttl_secs: Option<u64>,
    attribute_cache_ttl_secs: Option<u64>,
    max_concurrent_fetches: Option<usize>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}
