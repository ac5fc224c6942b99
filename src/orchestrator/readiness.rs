//! TCP readiness probing for managed processes that serve a socket.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::process::ReadyProbe;

/// Interval between connection attempts.
pub const READY_POLL: Duration = Duration::from_secs(1);

/// Wait until `probe`'s address accepts a connection. Returns `false` if the
/// probe timed out.
pub async fn wait_ready(name: &str, probe: &ReadyProbe) -> bool {
    let ready = wait_for_tcp(probe.tcp, probe.timeout, READY_POLL).await;
    if ready {
        info!(name, addr = %probe.tcp, "process ready");
    } else {
        warn!(name, addr = %probe.tcp, timeout = ?probe.timeout, "readiness probe timed out, continuing");
    }
    ready
}

/// Poll `addr` every `poll` until a connection succeeds or `timeout`
/// elapses.
pub async fn wait_for_tcp(addr: SocketAddr, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return true,
            Ok(Err(err)) => debug!(%addr, %err, "not ready yet"),
            Err(_elapsed) => return false,
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}
