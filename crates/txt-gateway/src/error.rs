//! Gateway errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while routing, supervising or streaming.
///
/// All failures stay local to the request or task that hit them; none of
/// these aborts the gateway process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Request path does not decompose into a known command.
    #[error("invalid request '{0}'")]
    InvalidRequest(SmolStr),

    /// Workspace directory or project descriptor is missing or unreadable.
    #[error("workspace not found '{0}'")]
    WorkspaceNotFound(SmolStr),

    /// Workspace file operation failed.
    #[error("workspace i/o error '{0}'")]
    WorkspaceIo(SmolStr),

    /// An application session is already running.
    #[error("session busy")]
    SessionBusy,

    /// Application process could not be spawned.
    #[error("spawn error '{0}'")]
    Spawn(SmolStr),

    /// Writing into a session channel failed.
    #[error("channel write error '{0}'")]
    ChannelWrite(SmolStr),

    /// Malformed request body.
    #[error("invalid body '{0}'")]
    InvalidBody(SmolStr),

    /// Configuration error.
    #[error("invalid config '{0}'")]
    InvalidConfig(SmolStr),

    /// HTTP server error.
    #[error("server error '{0}'")]
    Server(SmolStr),
}
