//! Liveness probes for managed processes.

use serde::{Deserialize, Serialize};
use std::net::TcpListener;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// How a node proves it is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// The management port accepts TCP connections.
    #[default]
    Tcp,

    /// The process is still alive after a short grace period.
    Process,
}

/// Attempts one TCP connection to `host:port`.
pub async fn port_accepts(host: &str, port: u16, within: Duration) -> bool {
    matches!(
        timeout(within, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Whether nothing is listening on `port` on any interface.
pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}
