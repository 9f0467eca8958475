use thiserror::Error;

/// Outcomes of `Driver::open`/`Session::run`, as a tagged-variant model of
/// device connect/auth failures instead of a single opaque error string.
#[derive(Debug, Error)]
pub enum SessionError {
    /// None of the reachability probes succeeded; no credential was consumed.
    #[error("device unreachable")]
    Unreachable,

    /// The credential was rejected. Caller rotates to the next candidate;
    /// this credential's failure-count is incremented by the resolver.
    #[error("authentication failed")]
    AuthFailed,

    /// Connect or command failure other than authentication (protocol
    /// error, unexpected EOF, device-side rejection not related to auth).
    #[error("device error: {0}")]
    DeviceError(String),

    /// Connect or per-command deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No driver registered for the device's `device_family`.
    #[error("no driver registered for device family '{0}'")]
    UnknownDeviceFamily(String),

    #[error("internal session error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Transient lower-layer errors get one automatic retry with the same
    /// credential; authentication failures never do.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Timeout(_) | SessionError::DeviceError(_))
    }
}
