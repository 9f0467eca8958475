use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job run not found: {0}")]
    JobRunNotFound(String),

    #[error("job run {0} is not pending")]
    NotPending(String),

    #[error("job definition not found: {0}")]
    JobDefinitionNotFound(String),

    #[error("no credential candidates for this device")]
    NoCandidates,

    #[error("store error: {0}")]
    Store(#[from] netraven_store::StoreError),

    #[error("internal dispatcher error: {0}")]
    Internal(String),
}

/// Outcome of a single handler's `execute`. Kept distinct from
/// `DispatchError` — a handler error is always recorded as a per-device
/// FAILED result, never propagated to abort the run (spec §7: "Handler
/// errors — caught by the worker and recorded as per-device FAILED with
/// the handler's message").
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("session error: {0}")]
    Session(#[from] netraven_session::SessionError),

    #[error("store error: {0}")]
    Store(#[from] netraven_store::StoreError),

    #[error("{0}")]
    Other(String),
}
