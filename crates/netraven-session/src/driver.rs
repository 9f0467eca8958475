use async_trait::async_trait;
use netraven_domain::Device;

use crate::error::SessionError;

/// Connect/command deadlines and the ICMP probe timeout, threaded down from
/// `netraven-config`'s runtime configuration. Kept as plain fields here
/// rather than depending on the config crate, so `netraven-session` stays a
/// leaf in the dependency order.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub connect_timeout: std::time::Duration,
    pub command_timeout: std::time::Duration,
    pub icmp_timeout: std::time::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout: std::time::Duration::from_secs(30),
            command_timeout: std::time::Duration::from_secs(30),
            icmp_timeout: std::time::Duration::from_millis(1000),
        }
    }
}

/// Result of the reachability probe performed before authentication.
/// Recorded even on subsequent session success.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ReachabilityProbe {
    pub icmp: bool,
    pub tcp_22: bool,
    pub tcp_443: bool,
    pub latency_ms: Option<u64>,
}

impl ReachabilityProbe {
    pub fn any_succeeded(&self) -> bool {
        self.icmp || self.tcp_22 || self.tcp_443
    }
}

/// One open session to a device, obtained from `Driver::open`. Must be
/// released on every exit path — callers always call `close`, including on
/// the error paths of `run`.
#[async_trait]
pub trait Session: Send {
    async fn run(&mut self, command: &str) -> Result<String, SessionError>;
    async fn close(self: Box<Self>);
}

/// Pluggable per-device-family driver. Registered in a
/// [`crate::registry::DriverRegistry`] keyed by `Device::device_family`.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn family(&self) -> &'static str;

    /// ICMP echo, TCP connect to the control port (commonly 22), TCP connect
    /// to the management port (commonly 443). Never consumes a credential.
    async fn probe(&self, device: &Device, cfg: &SessionConfig) -> ReachabilityProbe;

    /// Authenticates and returns an open session. Callers must have already
    /// run `probe` and observed `any_succeeded()`; a driver may still return
    /// `Unreachable` if connectivity drops between the probe and the open
    /// call. One automatic retry on transient errors happens inside this
    /// call; auth failures are never retried.
    async fn open(
        &self,
        device: &Device,
        username: &str,
        secret: &[u8],
        cfg: &SessionConfig,
    ) -> Result<Box<dyn Session>, SessionError>;
}
