//! Echo server binary.
//!
//! Usage: `server <port>`

use clap::Parser;
use nine_echo::config::{ServerArgs, ServerConfig};
use nine_echo::logging;
use nine_echo::server::Server;
use std::process::ExitCode;
use tracing::info;

fn main() -> ExitCode {
    let args = match ServerArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // Usage errors exit with 1; --help and --version are not errors
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Exception: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load(args)?;
    logging::init(&config.log_level);

    info!(
        listen = %config.listen,
        sample_interval_ms = config.sample_interval.as_millis() as u64,
        pipeline_depth = config.pipeline_depth,
        nodelay = config.nodelay,
        "Starting echo server"
    );

    // All socket I/O runs on one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let server = Server::bind(config)?;
        server.run_until(shutdown_signal()).await
    })?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed
        std::future::pending::<()>().await;
    }
}
