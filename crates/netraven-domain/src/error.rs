use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    #[error("invalid port: {0}")]
    InvalidPort(i64),

    #[error("job definition must target exactly one of device or tags")]
    AmbiguousTarget,

    #[error("job definition target is empty")]
    EmptyTarget,

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("interval must be at least 60 seconds, got {0}")]
    IntervalTooShort(u64),

    #[error("unregistered job type: {0}")]
    UnknownJobType(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
