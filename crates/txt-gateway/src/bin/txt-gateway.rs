//! CLI entrypoint for the device gateway.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use smol_str::SmolStr;
use tracing::info;

use txt_gateway::config::GatewayConfig;
use txt_gateway::gateway::{start_gateway, Gateway};

#[derive(Debug, Parser)]
#[command(
    name = "txt-gateway",
    version,
    about = "Device gateway for ROBO Pro Coding",
    after_help = "Examples:\n  txt-gateway                     # listen on 0.0.0.0:8000\n  txt-gateway -l 127.0.0.1 -p 9000\n  txt-gateway --runner ./run.py --workspaces ./workspaces"
)]
struct Cli {
    /// IP address on which the server listens.
    #[arg(long, short)]
    listen: Option<String>,
    /// Port on which the server listens.
    #[arg(long, short)]
    port: Option<u16>,
    /// Configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Workspace root directory.
    #[arg(long)]
    workspaces: Option<PathBuf>,
    /// Program used to run uploaded applications.
    #[arg(long)]
    runner: Option<PathBuf>,
    /// Show debug output.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match cli.config.as_deref() {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = SmolStr::new(listen);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(workspaces) = cli.workspaces {
        config.workspaces_root = workspaces;
    }
    if let Some(runner) = cli.runner {
        config.runner = runner;
    }

    let server = start_gateway(Gateway::new(config)).context("starting gateway")?;
    info!("serving on http://{}", server.listen());
    server.join();
    Ok(())
}
