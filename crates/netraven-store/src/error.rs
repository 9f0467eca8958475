use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job definition not found: {0}")]
    JobDefinitionNotFound(String),

    #[error("job run not found: {0}")]
    JobRunNotFound(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// Returned by `create_job_run` when a RUNNING run already exists for
    /// the definition (the overlap guard).
    #[error("job definition {0} already has a running job run")]
    Overlapping(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("secret decryption failed: {0}")]
    Decrypt(String),

    #[error("internal store error: {0}")]
    Internal(String),
}
