use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                $name(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(DeviceId);
uuid_id!(TagId);
uuid_id!(CredentialId);
uuid_id!(JobDefinitionId);
uuid_id!(JobRunId);

// ── Tag ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    /// User-facing grouping, e.g. "site", "role", "vendor". Opaque to the core.
    pub kind: String,
}

// ── Device ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReachabilityStatus {
    #[default]
    Never,
    Reachable,
    Unreachable,
}

impl std::fmt::Display for ReachabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReachabilityStatus::Never => "never",
            ReachabilityStatus::Reachable => "reachable",
            ReachabilityStatus::Unreachable => "unreachable",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub hostname: String,
    /// IP address or DNS name. Validated at construction; never re-validated
    /// by downstream consumers.
    pub address: String,
    /// Selects the `Driver` implementation in the session registry
    /// (e.g. "cisco_ios", "juniper_junos", "generic").
    pub device_family: String,
    pub port: u16,
    pub tags: HashSet<TagId>,
    pub last_reachability_status: ReachabilityStatus,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Validates the invariants from the data model: address must look like
    /// an IP or DNS name and port must be in 1..65535. A full DNS grammar
    /// check is the config-CRUD surface's job; this is a cheap sanity check
    /// against obviously malformed input reaching the dispatcher.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.address.trim().is_empty() {
            return Err(DomainError::InvalidAddress(self.address.clone()));
        }
        if self.address.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidAddress(self.address.clone()));
        }
        if self.port == 0 {
            return Err(DomainError::InvalidPort(self.port as i64));
        }
        Ok(())
    }
}

// ── Credential ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub username: String,
    /// AEAD ciphertext; see `netraven-store`'s secret codec. Never logged.
    pub encrypted_secret: Vec<u8>,
    /// Lower value = tried first.
    pub priority: i32,
    pub tags: HashSet<TagId>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

// ── Job definition ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTarget {
    Device(DeviceId),
    Tags(HashSet<TagId>),
}

impl JobTarget {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let JobTarget::Tags(tags) = self {
            if tags.is_empty() {
                return Err(DomainError::EmptyTarget);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Period in seconds. Invariant: >= 60.
    Interval { period_seconds: u64, fire_immediately: bool },
    /// Standard 5-field, UTC, no seconds field, no named shortcuts.
    Cron { expression: String },
    /// Fires once at `at`, never again afterwards.
    OneTime { at: DateTime<Utc> },
}

impl Schedule {
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Schedule::Interval { period_seconds, .. } => {
                if *period_seconds < 60 {
                    return Err(DomainError::IntervalTooShort(*period_seconds));
                }
                Ok(())
            }
            Schedule::Cron { expression } => {
                crate::cron::validate(expression)
                    .map_err(|reason| DomainError::InvalidCron { expr: expression.clone(), reason })
            }
            Schedule::OneTime { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobDefinitionId,
    pub name: String,
    /// Registry key, e.g. "backup" or "reachability".
    pub job_type: String,
    pub target: JobTarget,
    pub schedule: Schedule,
    pub enabled: bool,
    /// Opaque key-value bag passed to the handler.
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl JobDefinition {
    /// User-input validation performed at definition create/update time, so
    /// that invalid schedules and ambiguous targets never reach the
    /// dispatcher (spec error taxonomy: "User input errors").
    pub fn validate(&self) -> Result<(), DomainError> {
        self.target.validate()?;
        self.schedule.validate()?;
        Ok(())
    }
}

// ── Job run ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Pending,
    Running,
    CompletedSuccess,
    CompletedPartialFailure,
    CompletedFailure,
    CompletedNoDevices,
    CompletedNoCredentials,
    FailedDispatcherError,
    FailedUnexpected,
}

impl JobRunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobRunStatus::Pending | JobRunStatus::Running)
    }
}

impl std::fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobRunStatus::Pending => "pending",
            JobRunStatus::Running => "running",
            JobRunStatus::CompletedSuccess => "completed_success",
            JobRunStatus::CompletedPartialFailure => "completed_partial_failure",
            JobRunStatus::CompletedFailure => "completed_failure",
            JobRunStatus::CompletedNoDevices => "completed_no_devices",
            JobRunStatus::CompletedNoCredentials => "completed_no_credentials",
            JobRunStatus::FailedDispatcherError => "failed_dispatcher_error",
            JobRunStatus::FailedUnexpected => "failed_unexpected",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub job_definition_id: JobDefinitionId,
    pub status: JobRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Count of devices whose DeviceResult reached COMPLETED.
    pub succeeded_devices: u32,
    /// Count of devices whose DeviceResult reached FAILED.
    pub failed_devices: u32,
    pub total_devices: u32,
    /// Restricts this run to a subset of devices (spec's "retry-failed").
    /// None means the run resolves the full target set.
    pub device_subset: Option<Vec<DeviceId>>,
}

impl JobRun {
    pub fn new_pending(job_definition_id: JobDefinitionId) -> Self {
        JobRun {
            id: JobRunId::new(),
            job_definition_id,
            status: JobRunStatus::Pending,
            started_at: None,
            completed_at: None,
            succeeded_devices: 0,
            failed_devices: 0,
            total_devices: 0,
            device_subset: None,
        }
    }
}

// ── Device result ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceResultStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DeviceResultStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceResultStatus::Completed | DeviceResultStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResult {
    pub job_run_id: JobRunId,
    pub device_id: DeviceId,
    pub status: DeviceResultStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Handler-specific payload, e.g. `{"artifact_hash": "...", "bytes": 4000}`.
    pub payload: Option<serde_json::Value>,
    /// Short machine-readable reason, e.g. "auth_exhausted", "unreachable".
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub credential_id: Option<CredentialId>,
}

impl DeviceResult {
    pub fn pending(job_run_id: JobRunId, device_id: DeviceId) -> Self {
        DeviceResult {
            job_run_id,
            device_id,
            status: DeviceResultStatus::Pending,
            started_at: None,
            completed_at: None,
            payload: None,
            error_code: None,
            error_message: None,
            credential_id: None,
        }
    }
}

// ── Job log entry ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Job,
    Connection,
    Handler,
    Dispatcher,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_run_id: JobRunId,
    pub device_id: Option<DeviceId>,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    /// Redacted before persistence/publication — see `netraven-logging`.
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Per-device monotonically increasing sequence number; `None` for
    /// run-level (no single device) entries.
    pub sequence: Option<u64>,
}

// ── Config artifact ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigArtifactRef {
    /// Hex-encoded SHA-256 of the content.
    pub content_hash: String,
    pub device_id: DeviceId,
    pub job_run_id: JobRunId,
    pub retrieved_at: DateTime<Utc>,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(n: &str) -> TagId {
        let _ = n;
        TagId::new()
    }

    #[test]
    fn device_rejects_empty_address() {
        let d = Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "".into(),
            device_family: "generic".into(),
            port: 22,
            tags: HashSet::new(),
            last_reachability_status: ReachabilityStatus::Never,
            last_updated_at: None,
        };
        assert!(d.validate().is_err());
    }

    #[test]
    fn device_rejects_zero_port() {
        let d = Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: "generic".into(),
            port: 0,
            tags: HashSet::new(),
            last_reachability_status: ReachabilityStatus::Never,
            last_updated_at: None,
        };
        assert!(d.validate().is_err());
    }

    #[test]
    fn job_target_tags_must_be_nonempty() {
        let empty = JobTarget::Tags(HashSet::new());
        assert!(empty.validate().is_err());

        let mut set = HashSet::new();
        set.insert(tag("a"));
        let nonempty = JobTarget::Tags(set);
        assert!(nonempty.validate().is_ok());
    }

    #[test]
    fn interval_schedule_rejects_short_period() {
        let s = Schedule::Interval { period_seconds: 30, fire_immediately: false };
        assert!(s.validate().is_err());

        let s = Schedule::Interval { period_seconds: 60, fire_immediately: false };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn cron_schedule_rejects_malformed_expression() {
        let s = Schedule::Cron { expression: "not a cron".into() };
        assert!(s.validate().is_err());

        let s = Schedule::Cron { expression: "*/5 * * * *".into() };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn job_run_starts_pending() {
        let run = JobRun::new_pending(JobDefinitionId::new());
        assert_eq!(run.status, JobRunStatus::Pending);
        assert!(run.started_at.is_none());
    }
}
