//! # Ringside Node Entry Point
//!
//! ```text
//! ringside-node run [config.toml]
//! ringside-node status [--port PORT]
//! ringside-node health [--port PORT]
//! ringside-node version
//! ```
//!
//! ## Initialization Flow (`run`)
//! 1. Load env file, init tracing
//! 2. Load and validate config
//! 3. Build collaborators
//! 4. Run the lifecycle orchestrator (boot path + job registration)
//! 5. Serve HTTP until Ctrl+C

mod cli;

use std::env;

use tracing::{error, info, Level};

pub(crate) const NODE_NAME: &str = "ringside-node";

pub(crate) const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const DEFAULT_HTTP_PORT: u16 = 8080;

/// `RINGSIDE_LOG_LEVEL`, default INFO.
fn log_level() -> Level {
    env::var("RINGSIDE_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

#[tokio::main]
async fn main() {
    cli::load_env_file();

    tracing_subscriber::fmt()
        .with_max_level(log_level())
        .with_target(false)
        .init();

    if let Ok(path) = env::var("_RINGSIDE_LOADED_ENV_FILE") {
        info!("loaded env file {}", path);
    }

    let args: Vec<String> = env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or(NODE_NAME);
    let rest = args.get(2..).unwrap_or(&[]);

    let result = match args.get(1).map(String::as_str) {
        Some("run") => cli::cmd_run(rest).await,
        Some("status") => cli::cmd_status(cli::parse_port_flag(rest)).await,
        Some("health") => cli::cmd_health(cli::parse_port_flag(rest)).await,
        Some("version") | Some("--version") | Some("-V") => {
            cli::cmd_version();
            Ok(())
        }
        Some("help") | Some("--help") | Some("-h") => {
            cli::print_usage(prog);
            Ok(())
        }
        _ => {
            cli::print_usage(prog);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
