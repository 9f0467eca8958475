use std::net::ToSocketAddrs;
use std::time::Instant;

use netraven_domain::Device;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::driver::{ReachabilityProbe, SessionConfig};

/// Shared reachability implementation every built-in driver delegates to,
/// so the probe semantics (three independent booleans, latency from the
/// fastest successful check) stay identical across device families.
pub async fn probe_device(device: &Device, cfg: &SessionConfig) -> ReachabilityProbe {
    let start = Instant::now();
    let icmp = probe_icmp(&device.address, cfg.icmp_timeout).await;
    let tcp_22 = probe_tcp(&device.address, 22, cfg.connect_timeout).await;
    let tcp_443 = probe_tcp(&device.address, 443, cfg.connect_timeout).await;

    let latency_ms = if icmp || tcp_22 || tcp_443 {
        Some(start.elapsed().as_millis() as u64)
    } else {
        None
    };

    ReachabilityProbe { icmp, tcp_22, tcp_443, latency_ms }
}

async fn probe_tcp(address: &str, port: u16, deadline: std::time::Duration) -> bool {
    let target = format!("{address}:{port}");
    let Ok(mut addrs) = target.to_socket_addrs() else { return false };
    let Some(addr) = addrs.next() else { return false };
    matches!(timeout(deadline, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

async fn probe_icmp(address: &str, deadline: std::time::Duration) -> bool {
    use rand::Rng;
    use surge_ping::{Client, Config, PingIdentifier, PingSequence};

    let Ok(ip) = address.parse() else {
        // DNS names still resolve for the TCP probes above; ICMP here is
        // best-effort and only handles literal IPs.
        return false;
    };
    let Ok(client) = Client::new(&Config::default()) else { return false };
    let mut rng = rand::thread_rng();
    let identifier = PingIdentifier(rng.gen());
    let payload = [0u8; 8];
    let mut pinger = client.pinger(ip, identifier).await;
    timeout(deadline, pinger.ping(PingSequence(0), &payload))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_probe_fails_fast_against_a_closed_port() {
        // Port 1 is almost universally closed/filtered; this exercises the
        // failure path without depending on external network availability.
        let ok = probe_tcp("127.0.0.1", 1, std::time::Duration::from_millis(200)).await;
        assert!(!ok);
    }
}
