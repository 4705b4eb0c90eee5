//! nine-echo: a fixed-frame TCP echo service and heartbeat client
//!
//! Every message is exactly 9 bytes. The server echoes whatever it
//! receives; the client sends `123456789` and waits for the echo.
//!
//! Features:
//! - Pipelined server sessions (next read starts before the echo lands)
//! - Client connect failover across every resolved endpoint
//! - Per-second throughput sampling
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod connector;
pub mod frame;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
