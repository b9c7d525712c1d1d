//! netbridge line client
//!
//! Connects to a line-oriented server, sends one line, and prints every line
//! it gets back until the server goes quiet or hangs up.
//!
//! Usage: `netbridge-line-client [config.toml] [line]`
//!
//! Environment variables:
//! - NETBRIDGE_HOST: Server hostname or address (overrides the config file)
//! - NETBRIDGE_PORT: Server port (overrides the config file)
//! - NETBRIDGE_LOG_LEVEL: error|warn|notice|info|debug|verbose
//! - NETBRIDGE_LOG_FORMAT: serial|compact

use std::env;
use std::process::ExitCode;

use netbridge::config::TransportConfig;
use netbridge::prelude::*;
use netbridge::trace::init_default_logging;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
enum DemoError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transport: {0}")]
    Net(#[from] NetError),
}

fn load_config(path: Option<&str>) -> Result<TransportConfig, ConfigError> {
    let config = match path {
        Some(path) => TransportConfig::from_file(path)?,
        None => TransportConfig::default(),
    };
    config.with_env_overrides()
}

async fn run(config: TransportConfig, line: &str) -> Result<(), DemoError> {
    let mut net = config.network(TcpBackend::new(), SystemResolver);
    net.connect(&config.connect_params()).await?;

    let mut payload = line.as_bytes().to_vec();
    payload.extend_from_slice(b"\r\n");
    net.write(&payload, config.send_timeout_ms).await?;

    loop {
        match net.read_line(config.max_message_size).await {
            Ok(reply) => println!("{reply}"),
            Err(NetError::RecvTimeout) => {
                info!("server quiet, done");
                break;
            }
            Err(NetError::ConnReset) => {
                info!("server closed the connection");
                break;
            }
            Err(e) => {
                net.disconnect();
                return Err(e.into());
            }
        }
    }

    net.disconnect();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_default_logging() {
        eprintln!("logging already initialised: {e}");
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let config_path = args.first().filter(|a| a.ends_with(".toml")).map(String::as_str);
    let line = args
        .iter()
        .find(|a| !a.ends_with(".toml"))
        .map(String::as_str)
        .unwrap_or("PING");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("netbridge-line-client: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config, line).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!(error = %e, "line client failed");
            eprintln!("netbridge-line-client: {e}");
            ExitCode::FAILURE
        }
    }
}
