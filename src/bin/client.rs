//! Heartbeat client binary.
//!
//! Usage: `client <host> <port>`

use clap::Parser;
use nine_echo::client::{self, Client};
use nine_echo::config::{ClientArgs, ClientConfig};
use nine_echo::logging;
use std::process::ExitCode;
use tracing::{info, warn};

fn main() -> ExitCode {
    let args = match ClientArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
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

fn run(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load(args)?;
    logging::init(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        connect_timeout_ms = config.connect_timeout.map(|d| d.as_millis() as u64),
        count = config.count,
        "Starting heartbeat client"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        // Resolution failure aborts start-up
        let endpoints = client::resolve(&config.host, config.port).await?;

        let client = Client::new(&config);
        let control = client.control();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                control.stop();
            }
        });

        match client.run(&endpoints).await {
            Ok(report) => info!(
                endpoint = %report.endpoint,
                exchanges = report.heartbeat.exchanges,
                short_frames = report.heartbeat.short_frames,
                mismatches = report.heartbeat.mismatches,
                "Client finished"
            ),
            // Connect failures end the client quietly
            Err(e) => warn!(error = %e, "Client stopped"),
        }

        Ok::<(), std::io::Error>(())
    })?;

    Ok(())
}
