use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use netraven_domain::Device;

use crate::driver::{Driver, ReachabilityProbe, Session, SessionConfig};
use crate::error::SessionError;

/// A deterministic, no-I/O driver for tests. Scripted with a canned probe
/// result and a queue of per-credential open outcomes, so dispatcher tests
/// can drive scenarios like credential rotation or partial failure without
/// a real network.
pub struct ScriptedDriver {
    probe_result: ReachabilityProbe,
    /// Consumed in order, one per `open` call.
    open_outcomes: Mutex<VecDeque<OpenOutcome>>,
    /// What `run` returns once a session is open.
    command_output: String,
}

#[derive(Clone)]
pub enum OpenOutcome {
    Success,
    AuthFailed,
    Unreachable,
    DeviceError(String),
}

impl ScriptedDriver {
    pub fn new(probe_result: ReachabilityProbe, outcomes: Vec<OpenOutcome>) -> Self {
        ScriptedDriver {
            probe_result,
            open_outcomes: Mutex::new(outcomes.into()),
            command_output: "Building configuration...\n!\nend\n".to_string(),
        }
    }

    pub fn always_reachable() -> Self {
        ScriptedDriver::new(
            ReachabilityProbe { icmp: true, tcp_22: true, tcp_443: false, latency_ms: Some(5) },
            vec![OpenOutcome::Success],
        )
    }

    pub fn with_command_output(mut self, output: impl Into<String>) -> Self {
        self.command_output = output.into();
        self
    }
}

struct ScriptedSession {
    output: String,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn run(&mut self, _command: &str) -> Result<String, SessionError> {
        Ok(self.output.clone())
    }

    async fn close(self: Box<Self>) {}
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn family(&self) -> &'static str {
        "scripted"
    }

    async fn probe(&self, _device: &Device, _cfg: &SessionConfig) -> ReachabilityProbe {
        self.probe_result
    }

    async fn open(
        &self,
        _device: &Device,
        _username: &str,
        _secret: &[u8],
        _cfg: &SessionConfig,
    ) -> Result<Box<dyn Session>, SessionError> {
        let outcome = {
            let mut q = self.open_outcomes.lock().expect("lock poisoned");
            q.pop_front().unwrap_or(OpenOutcome::AuthFailed)
        };
        match outcome {
            OpenOutcome::Success => {
                Ok(Box::new(ScriptedSession { output: self.command_output.clone() }))
            }
            OpenOutcome::AuthFailed => Err(SessionError::AuthFailed),
            OpenOutcome::Unreachable => Err(SessionError::Unreachable),
            OpenOutcome::DeviceError(msg) => Err(SessionError::DeviceError(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netraven_domain::DeviceId;

    fn device() -> Device {
        Device {
            id: DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: "scripted".into(),
            port: 22,
            tags: Default::default(),
            last_reachability_status: Default::default(),
            last_updated_at: None,
        }
    }

    #[tokio::test]
    async fn outcomes_are_consumed_in_order() {
        let driver = ScriptedDriver::new(
            ReachabilityProbe { icmp: true, tcp_22: true, tcp_443: true, latency_ms: Some(1) },
            vec![OpenOutcome::AuthFailed, OpenOutcome::Success],
        );
        let cfg = SessionConfig::default();
        let d = device();

        let first = driver.open(&d, "u1", b"p1", &cfg).await;
        assert!(matches!(first, Err(SessionError::AuthFailed)));

        let second = driver.open(&d, "u2", b"p2", &cfg).await;
        assert!(second.is_ok());
    }
}
