//! Client-side connection establishment with endpoint failover.
//!
//! Endpoints are tried strictly in order. A failed or timed-out attempt
//! closes its socket before the next endpoint is tried; the first success
//! ends the walk, so later endpoints are never contacted.

use crate::session::SessionControl;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Opens a stream to a single endpoint.
pub trait Dial {
    type Stream;

    fn dial(&self, addr: SocketAddr) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Copy)]
pub struct TcpDialer {
    nodelay: bool,
}

impl TcpDialer {
    pub fn new(nodelay: bool) -> Self {
        Self { nodelay }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Dial for TcpDialer {
    type Stream = TcpStream;

    fn dial(&self, addr: SocketAddr) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let nodelay = self.nodelay;
        async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(nodelay)?;
            Ok(stream)
        }
    }
}

/// A successfully established connection.
#[derive(Debug)]
pub struct Connected<S> {
    pub stream: S,
    pub endpoint: SocketAddr,
    /// 1-based position of `endpoint` in the candidate list
    pub attempts: usize,
}

/// Connection establishment errors
#[derive(Debug)]
pub enum ConnectError {
    /// The candidate list was empty.
    NoEndpoints,
    /// Every candidate failed.
    Exhausted { attempts: usize },
    /// The session was stopped before a connection was made.
    Stopped,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::NoEndpoints => write!(f, "no endpoints to connect to"),
            ConnectError::Exhausted { attempts } => {
                write!(f, "all endpoints exhausted after {attempts} attempts")
            }
            ConnectError::Stopped => write!(f, "connector stopped"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Walks an endpoint list until one accepts.
#[derive(Debug)]
pub struct Connector<D = TcpDialer> {
    dialer: D,
    connect_timeout: Option<Duration>,
    control: SessionControl,
}

impl<D: Dial> Connector<D> {
    pub fn new(dialer: D, connect_timeout: Option<Duration>, control: SessionControl) -> Self {
        Self {
            dialer,
            connect_timeout,
            control,
        }
    }

    /// Session control shared with whoever drives the connection.
    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    /// Try `endpoints` in order and return the first connected stream.
    ///
    /// On success the session moves to `Active`. An empty list or an
    /// exhausted list stops the session. Once stopped, no attempt is made.
    pub async fn connect(&self, endpoints: &[SocketAddr]) -> Result<Connected<D::Stream>, ConnectError> {
        if self.control.is_stopped() {
            return Err(ConnectError::Stopped);
        }
        if endpoints.is_empty() {
            warn!("No endpoints to connect to");
            self.control.stop();
            return Err(ConnectError::NoEndpoints);
        }

        for (i, &endpoint) in endpoints.iter().enumerate() {
            info!("Trying {endpoint}...");

            let attempt = match self.control.until_stopped(self.attempt(endpoint)).await {
                Some(attempt) => attempt,
                None => return Err(ConnectError::Stopped),
            };

            match attempt {
                Ok(stream) => {
                    if !self.control.activate() {
                        // Stopped between completion and activation
                        return Err(ConnectError::Stopped);
                    }
                    info!("Connected to {endpoint}");
                    return Ok(Connected {
                        stream,
                        endpoint,
                        attempts: i + 1,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    warn!(%endpoint, "Connect timed out");
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "Connect error");
                }
            }
        }

        warn!(attempts = endpoints.len(), "All endpoints exhausted");
        self.control.stop();
        Err(ConnectError::Exhausted {
            attempts: endpoints.len(),
        })
    }

    /// One connect attempt, bounded by the configured deadline.
    ///
    /// A failed attempt's socket is dropped here, before the caller moves on.
    async fn attempt(&self, endpoint: SocketAddr) -> io::Result<D::Stream> {
        match self.connect_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.dialer.dial(endpoint))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
            None => self.dialer.dial(endpoint).await,
        }
    }
}
