use serde::{Deserialize, Serialize};

/// Raw YAML representation of the runtime configuration file. Every field
/// has a default except `credentials.encryption_key`, which is mandatory —
/// there is no safe default for a secret encryption key.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawConfig {
    #[serde(default)]
    pub scheduler: RawScheduler,
    #[serde(default)]
    pub dispatcher: RawDispatcher,
    #[serde(default)]
    pub session: RawSession,
    #[serde(default)]
    pub reachability: RawReachability,
    pub credentials: RawCredentials,
    #[serde(default)]
    pub log: RawLog,
    #[serde(default)]
    pub store: RawStore,
    #[serde(default)]
    pub api: RawApi,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawScheduler {
    #[serde(default = "default_max_concurrent_job_runs")]
    pub max_concurrent_job_runs: u32,
}

impl Default for RawScheduler {
    fn default() -> Self {
        RawScheduler { max_concurrent_job_runs: default_max_concurrent_job_runs() }
    }
}

fn default_max_concurrent_job_runs() -> u32 {
    8
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawDispatcher {
    #[serde(default = "default_max_concurrent_devices")]
    pub max_concurrent_devices: u32,
}

impl Default for RawDispatcher {
    fn default() -> Self {
        RawDispatcher { max_concurrent_devices: default_max_concurrent_devices() }
    }
}

fn default_max_concurrent_devices() -> u32 {
    3
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawSession {
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
}

impl Default for RawSession {
    fn default() -> Self {
        RawSession {
            connect_timeout_seconds: default_connect_timeout_seconds(),
            command_timeout_seconds: default_command_timeout_seconds(),
        }
    }
}

fn default_connect_timeout_seconds() -> u64 {
    30
}

fn default_command_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawReachability {
    #[serde(default = "default_icmp_timeout_ms")]
    pub icmp_timeout_ms: u64,
}

impl Default for RawReachability {
    fn default() -> Self {
        RawReachability { icmp_timeout_ms: default_icmp_timeout_ms() }
    }
}

fn default_icmp_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawCredentials {
    /// 32-byte symmetric key (any string; stretched with SHA-256 by the
    /// store's secret codec). Required — no default key is ever baked in.
    pub encryption_key: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawLog {
    /// Extra redaction patterns, appended to the built-in
    /// password/secret/token set.
    #[serde(default)]
    pub redaction_patterns: Vec<String>,
}

impl Default for RawLog {
    fn default() -> Self {
        RawLog { redaction_patterns: Vec::new() }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStoreBackend {
    Memory,
    Postgres,
    Redb,
}

impl Default for RawStoreBackend {
    fn default() -> Self {
        RawStoreBackend::Memory
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawStore {
    #[serde(default)]
    pub backend: RawStoreBackend,
    /// Required when `backend: postgres`.
    pub postgres_url: Option<String>,
    /// Required when `backend: redb`.
    pub redb_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawApi {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub bearer_token: Option<String>,
}

impl Default for RawApi {
    fn default() -> Self {
        RawApi { bind_address: default_bind_address(), bearer_token: None }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}
