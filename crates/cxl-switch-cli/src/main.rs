//! Launcher for the fabric switch emulator.

mod app;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cxl_switch::SwitchConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cxl-switch", about = "User-space CXL fabric switch emulator")]
struct Args {
    /// Path to the JSON switch configuration.
    #[arg(long, env = "CXL_SWITCH_CONFIG")]
    config: PathBuf,

    /// Override the switch listen address from the config file.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the MCTP (fabric manager) listen address.
    #[arg(long)]
    mctp_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config: SwitchConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.config.display()))?;
    config.validate().context("validating switch config")?;

    let listen = match args.listen {
        Some(addr) => addr,
        None => format!("{}:{}", config.host, config.port)
            .parse()
            .context("switch listen address")?,
    };
    let mctp_listen = match args.mctp_listen {
        Some(addr) => addr,
        None => format!("{}:{}", config.mctp_host, config.mctp_port)
            .parse()
            .context("MCTP listen address")?,
    };

    let app = app::SwitchApp::new(&config, listen, mctp_listen)?;
    app.run_until_shutdown().await
}
