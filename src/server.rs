//! TCP echo server.
//!
//! Accepts connections indefinitely and hands each one to its own echo
//! session. There is no connection limit and accept errors never stop the
//! accept loop.

use crate::config::ServerConfig;
use crate::metrics::{self, ServerMetrics};
use crate::registry::SessionRegistry;
use crate::session::{self, SessionControl};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Listen backlog for the accept socket
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    metrics: Arc<ServerMetrics>,
    sessions: Arc<SessionRegistry>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::from_std(create_listener(config.listen)?)?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            config,
            listener,
            metrics: ServerMetrics::new(),
            sessions: Arc::new(SessionRegistry::new()),
        })
    }

    /// Address the server is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Throughput counters shared with every session.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Live sessions.
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    /// Accept connections forever.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes, then stop every live
    /// session.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let sampler = tokio::spawn(metrics::run_sampler(
            Arc::clone(&self.metrics),
            self.config.sample_interval,
            |rate| info!(qps = rate, "Throughput"),
        ));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        let stopped = self.sessions.stop_all();
        info!(sessions = stopped, "Server shutting down");
        sampler.abort();
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(self.config.nodelay) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let control = SessionControl::accepted();
        let id = self.sessions.insert(peer, control.clone());
        debug!(peer = %peer, slot = id.index(), "New connection");

        let metrics = Arc::clone(&self.metrics);
        let sessions = Arc::clone(&self.sessions);
        let pipeline_depth = self.config.pipeline_depth;

        tokio::spawn(async move {
            let summary = session::run_echo(stream, control, metrics, pipeline_depth).await;
            sessions.remove(id);
            debug!(
                peer = %peer,
                frames_read = summary.frames_read,
                frames_written = summary.frames_written,
                "Connection closed"
            );
        });
    }
}

/// Create the accept socket with SO_REUSEADDR so a restart can rebind at once.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::ClientConfig;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            sample_interval: Duration::from_secs(1),
            pipeline_depth: 16,
            nodelay: true,
            log_level: "info".to_string(),
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_end_to_end_thousand_exchanges() {
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let metrics = server.metrics();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(server.run_until(async {
            let _ = shutdown_rx.await;
        }));

        let client = Client::new(&ClientConfig {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            connect_timeout: Some(Duration::from_secs(5)),
            count: Some(1000),
            nodelay: true,
            log_level: "info".to_string(),
        });
        let report = client.run(&[addr]).await.unwrap();

        assert_eq!(report.heartbeat.exchanges, 1000);
        assert_eq!(report.heartbeat.mismatches, 0);
        assert_eq!(report.heartbeat.short_frames, 0);
        assert_eq!(metrics.completed(), 1000);

        let _ = shutdown_tx.send(());
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_connections_echo_independently() {
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let metrics = server.metrics();
        let server_task = tokio::spawn(server.run());

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        a.write_all(b"aaaaaaaaa").await.unwrap();
        b.write_all(b"bbbbbbbbb").await.unwrap();

        let mut reply = [0u8; 9];
        b.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"bbbbbbbbb");
        a.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"aaaaaaaaa");

        // Closing one connection leaves the other untouched
        drop(a);
        b.write_all(b"ccccccccc").await.unwrap();
        b.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ccccccccc");
        assert_eq!(metrics.completed(), 3);

        server_task.abort();
    }

    #[tokio::test]
    async fn test_closed_session_releases_its_slot() {
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let sessions = server.sessions();
        let server_task = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"123456789").await.unwrap();
        let mut reply = [0u8; 9];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(sessions.len(), 1);

        drop(stream);
        wait_until(|| sessions.is_empty()).await;

        server_task.abort();
    }

    #[tokio::test]
    async fn test_shutdown_stops_live_sessions() {
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let sessions = server.sessions();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(server.run_until(async {
            let _ = shutdown_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"123456789").await.unwrap();
        let mut reply = [0u8; 9];
        stream.read_exact(&mut reply).await.unwrap();

        let _ = shutdown_tx.send(());
        server_task.await.unwrap().unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        wait_until(|| sessions.is_empty()).await;
    }
}
