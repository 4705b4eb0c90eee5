//! Heartbeat client.
//!
//! Resolves the server, connects with failover, then runs the heartbeat
//! session on the first endpoint that accepts.

use crate::config::ClientConfig;
use crate::connector::{ConnectError, Connector, Dial, TcpDialer};
use crate::session::{self, HeartbeatSummary, SessionControl};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Resolve `host:port` into an ordered list of candidate endpoints.
pub async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let endpoints: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    info!(host, port, candidates = endpoints.len(), "Resolved server address");
    Ok(endpoints)
}

/// Result of a client run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientReport {
    /// Endpoint the session ran against
    pub endpoint: SocketAddr,
    pub heartbeat: HeartbeatSummary,
}

/// Client instance
pub struct Client<D = TcpDialer> {
    connector: Connector<D>,
    count: Option<u64>,
}

impl Client<TcpDialer> {
    /// Create a client that dials plain TCP.
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_dialer(config, TcpDialer::new(config.nodelay))
    }
}

impl<D> Client<D>
where
    D: Dial,
    D::Stream: AsyncRead + AsyncWrite + Unpin,
{
    pub fn with_dialer(config: &ClientConfig, dialer: D) -> Self {
        Self {
            connector: Connector::new(dialer, config.connect_timeout, SessionControl::new()),
            count: config.count,
        }
    }

    /// Handle for stopping the client from elsewhere.
    pub fn control(&self) -> SessionControl {
        self.connector.control().clone()
    }

    /// Connect to the first reachable endpoint and run the heartbeat loop
    /// until the session stops.
    pub async fn run(&self, endpoints: &[SocketAddr]) -> Result<ClientReport, ConnectError> {
        let connected = self.connector.connect(endpoints).await?;
        debug!(
            endpoint = %connected.endpoint,
            attempts = connected.attempts,
            "Starting heartbeat session"
        );
        let heartbeat =
            session::run_heartbeat(connected.stream, self.connector.control(), self.count).await;

        info!(
            endpoint = %connected.endpoint,
            exchanges = heartbeat.exchanges,
            "Client session ended"
        );
        Ok(ClientReport {
            endpoint: connected.endpoint,
            heartbeat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(count: Option<u64>) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            connect_timeout: Some(Duration::from_secs(5)),
            count,
            nodelay: true,
            log_level: "info".to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let endpoints = resolve("127.0.0.1", 4242).await.unwrap();
        assert_eq!(endpoints, vec![SocketAddr::from(([127, 0, 0, 1], 4242))]);
    }

    #[tokio::test]
    async fn test_heartbeat_against_manual_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = [0u8; 9];
            let mut seen = Vec::new();
            for _ in 0..3 {
                stream.read_exact(&mut frame).await.unwrap();
                seen.push(frame);
                stream.write_all(&frame).await.unwrap();
            }
            seen
        });

        let client = Client::new(&config(Some(3)));
        let report = client.run(&[addr]).await.unwrap();
        assert_eq!(report.endpoint, addr);
        assert_eq!(report.heartbeat.exchanges, 3);
        assert_eq!(report.heartbeat.mismatches, 0);

        let seen = peer.await.unwrap();
        assert!(seen.iter().all(|frame| frame == b"123456789"));
        assert!(client.control().is_stopped());
    }

    #[tokio::test]
    async fn test_run_after_stop_does_nothing() {
        let client = Client::new(&config(None));
        let control = client.control();
        assert!(control.stop());
        assert!(!control.stop());

        let err = client
            .run(&[SocketAddr::from(([127, 0, 0, 1], 9))])
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Stopped));
    }
}
