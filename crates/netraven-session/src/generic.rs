use std::time::Duration;

use async_trait::async_trait;
use netraven_domain::Device;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::driver::{Driver, ReachabilityProbe, Session, SessionConfig};
use crate::error::SessionError;
use crate::probe::probe_device;

const PROMPT_MARKERS: &[&str] = &["#", ">", "$"];
const AUTH_FAILURE_MARKERS: &[&str] = &["% Authentication failed", "Access denied", "Login incorrect"];
const READ_CHUNK: usize = 4096;

/// Line-oriented driver for devices that expose their CLI over a raw TCP
/// management port rather than a full SSH/NETCONF stack (e.g. a console
/// server, or a device's bare command port). Speaks a minimal expect-style
/// protocol: read until a prompt, write a line, repeat. Registered under
/// the `device_family` key `"generic"`; vendor-specific families can wrap
/// the same transport with their own prompt/banner conventions.
pub struct GenericLineDriver;

impl GenericLineDriver {
    pub fn new() -> Self {
        GenericLineDriver
    }
}

impl Default for GenericLineDriver {
    fn default() -> Self {
        Self::new()
    }
}

struct GenericLineSession {
    stream: BufReader<TcpStream>,
    command_timeout: Duration,
}

async fn read_until_prompt(
    stream: &mut BufReader<TcpStream>,
    deadline: Duration,
) -> Result<String, SessionError> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = timeout(deadline, stream.read(&mut chunk))
            .await
            .map_err(|_| SessionError::Timeout(deadline))?
            .map_err(|e| SessionError::DeviceError(e.to_string()))?;
        if n == 0 {
            return Err(SessionError::DeviceError("connection closed by device".into()));
        }
        collected.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&collected);
        if PROMPT_MARKERS.iter().any(|m| text.trim_end().ends_with(m)) {
            return Ok(text.into_owned());
        }
        if collected.len() > 1_000_000 {
            return Err(SessionError::DeviceError("response exceeded buffer limit".into()));
        }
    }
}

async fn write_line(
    stream: &mut BufReader<TcpStream>,
    line: &str,
    deadline: Duration,
) -> Result<(), SessionError> {
    let mut payload = line.as_bytes().to_vec();
    payload.push(b'\n');
    timeout(deadline, stream.get_mut().write_all(&payload))
        .await
        .map_err(|_| SessionError::Timeout(deadline))?
        .map_err(|e| SessionError::DeviceError(e.to_string()))
}

#[async_trait]
impl Session for GenericLineSession {
    async fn run(&mut self, command: &str) -> Result<String, SessionError> {
        write_line(&mut self.stream, command, self.command_timeout).await?;
        read_until_prompt(&mut self.stream, self.command_timeout).await
    }

    async fn close(mut self: Box<Self>) {
        let _ = self.stream.get_mut().shutdown().await;
    }
}

async fn connect_once(device: &Device, cfg: &SessionConfig) -> Result<TcpStream, SessionError> {
    let addr = format!("{}:{}", device.address, device.port);
    timeout(cfg.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| SessionError::Timeout(cfg.connect_timeout))?
        .map_err(|e| SessionError::DeviceError(e.to_string()))
}

#[async_trait]
impl Driver for GenericLineDriver {
    fn family(&self) -> &'static str {
        "generic"
    }

    async fn probe(&self, device: &Device, cfg: &SessionConfig) -> ReachabilityProbe {
        probe_device(device, cfg).await
    }

    async fn open(
        &self,
        device: &Device,
        username: &str,
        secret: &[u8],
        cfg: &SessionConfig,
    ) -> Result<Box<dyn Session>, SessionError> {
        // One automatic retry on transient lower-layer errors; never retried
        // once authentication itself has been attempted.
        let raw = match connect_once(device, cfg).await {
            Ok(s) => s,
            Err(e) if e.is_transient() => {
                debug!(device_id = %device.id, "transient connect failure, retrying once");
                tokio::time::sleep(Duration::from_secs(2)).await;
                connect_once(device, cfg).await?
            }
            Err(e) => return Err(e),
        };
        let mut stream = BufReader::new(raw);

        read_until_prompt(&mut stream, cfg.connect_timeout).await.ok();
        write_line(&mut stream, username, cfg.connect_timeout).await?;
        let banner = read_until_prompt(&mut stream, cfg.connect_timeout).await?;
        write_line(&mut stream, &String::from_utf8_lossy(secret), cfg.connect_timeout).await?;
        let post_auth = read_until_prompt(&mut stream, cfg.connect_timeout).await?;

        if AUTH_FAILURE_MARKERS.iter().any(|m| banner.contains(m) || post_auth.contains(m)) {
            return Err(SessionError::AuthFailed);
        }

        Ok(Box::new(GenericLineSession { stream, command_timeout: cfg.command_timeout }))
    }
}
