use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawConfig, RawStoreBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { url: String },
    Redb { path: String },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_concurrent_job_runs: u32,
    pub max_concurrent_devices: u32,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub icmp_timeout: Duration,
    pub encryption_key: String,
    pub redaction_patterns: Vec<String>,
    pub store_backend: StoreBackend,
    pub api_bind_address: SocketAddr,
    pub api_bearer_token: Option<String>,
}

/// Load and validate the runtime configuration file (YAML). A single file —
/// there's no multi-directory tree to walk.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!(path = %path.display(), "loading runtime configuration");
    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    convert(raw)
}

fn convert(raw: RawConfig) -> Result<RuntimeConfig, ConfigError> {
    if raw.scheduler.max_concurrent_job_runs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.max_concurrent_job_runs must be at least 1".into(),
        ));
    }
    if raw.dispatcher.max_concurrent_devices == 0 {
        return Err(ConfigError::Validation(
            "dispatcher.max_concurrent_devices must be at least 1".into(),
        ));
    }
    if raw.credentials.encryption_key.trim().is_empty() {
        return Err(ConfigError::Validation("credentials.encryption_key must not be empty".into()));
    }

    let store_backend = match raw.store.backend {
        RawStoreBackend::Memory => StoreBackend::Memory,
        RawStoreBackend::Postgres => StoreBackend::Postgres {
            url: raw.store.postgres_url.ok_or_else(|| {
                ConfigError::Validation("store.postgres_url is required when backend is 'postgres'".into())
            })?,
        },
        RawStoreBackend::Redb => StoreBackend::Redb {
            path: raw.store.redb_path.ok_or_else(|| {
                ConfigError::Validation("store.redb_path is required when backend is 'redb'".into())
            })?,
        },
    };

    let api_bind_address = raw.api.bind_address.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!("api.bind_address '{}' is invalid: {e}", raw.api.bind_address))
    })?;

    Ok(RuntimeConfig {
        max_concurrent_job_runs: raw.scheduler.max_concurrent_job_runs,
        max_concurrent_devices: raw.dispatcher.max_concurrent_devices,
        connect_timeout: Duration::from_secs(raw.session.connect_timeout_seconds),
        command_timeout: Duration::from_secs(raw.session.command_timeout_seconds),
        icmp_timeout: Duration::from_millis(raw.reachability.icmp_timeout_ms),
        encryption_key: raw.credentials.encryption_key,
        redaction_patterns: raw.log.redaction_patterns,
        store_backend,
        api_bind_address,
        api_bearer_token: raw.api.bearer_token,
    })
}
