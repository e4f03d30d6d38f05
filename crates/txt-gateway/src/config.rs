//! Gateway configuration.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::GatewayError;

/// Default HTTP port, matching what the IDE probes for.
pub const DEFAULT_PORT: u16 = 8000;

/// Gateway settings with their defaults filled in.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address for the HTTP server.
    pub listen: SmolStr,
    /// TCP port for the HTTP server.
    pub port: u16,
    /// Directory holding one subdirectory per uploaded workspace.
    pub workspaces_root: PathBuf,
    /// Program executed to run an uploaded application.
    pub runner: PathBuf,
    /// Cadence of liveness pings written into a running application.
    pub ping_interval: Duration,
    /// Bounded wait when draining the console queue for a stream client.
    pub poll_timeout: Duration,
    /// Cadence of synthetic interface-test snapshots.
    pub snapshot_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SmolStr::new("0.0.0.0"),
            port: DEFAULT_PORT,
            workspaces_root: PathBuf::from("workspaces"),
            runner: PathBuf::from("./run.py"),
            ping_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(100),
            snapshot_interval: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Load settings from a TOML file, falling back to defaults for any
    /// field the file leaves out.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            GatewayError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|err| {
            GatewayError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        let mut config = Self::default();
        let Some(gateway) = raw.gateway else {
            return Ok(config);
        };
        if let Some(listen) = gateway.listen {
            config.listen = SmolStr::new(listen);
        }
        if let Some(port) = gateway.port {
            config.port = port;
        }
        if let Some(workspaces) = gateway.workspaces {
            config.workspaces_root = workspaces;
        }
        if let Some(runner) = gateway.runner {
            config.runner = runner;
        }
        if let Some(ms) = gateway.ping_interval_ms {
            config.ping_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = gateway.poll_timeout_ms {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = gateway.snapshot_interval_ms {
            config.snapshot_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Socket address string the HTTP server binds to.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    gateway: Option<RawGateway>,
}

#[derive(Debug, Deserialize)]
struct RawGateway {
    listen: Option<String>,
    port: Option<u16>,
    workspaces: Option<PathBuf>,
    runner: Option<PathBuf>,
    ping_interval_ms: Option<u64>,
    poll_timeout_ms: Option<u64>,
    snapshot_interval_ms: Option<u64>,
}
