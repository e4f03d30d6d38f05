//! Request path parsing.
//!
//! The IDE encodes device commands hierarchically in the request path, e.g.
//! `/api/v1/controller/0/counters/1/message-stream`. [`parse`] maps a path
//! into a closed [`Command`] union. The grammar is intentionally permissive:
//! unknown trailing segments are logged and skipped because newer IDE builds
//! append fields the gateway does not understand yet; only prefix and target
//! mismatches fail the parse.

use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Interface selector on a controller path, optionally indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Interface name, e.g. `inputs` or `counters`.
    pub name: SmolStr,
    /// Optional port index following the name.
    pub id: Option<u32>,
}

/// Action suffix on an application or debugger path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramAction {
    /// Spawn the named application.
    Start,
    /// Stop the running session.
    Stop,
}

impl ProgramAction {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Controller query or stream subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerCommand {
    /// Controller index, absent for the built-in controller.
    pub id: Option<u32>,
    /// Requested interface, absent for controller-level requests.
    pub interface: Option<Interface>,
    /// `message-stream` suffix: subscribe instead of query.
    pub stream: bool,
    /// `stop` suffix: stop the running session.
    pub stop: bool,
}

/// Workspace metadata or file-listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceCommand {
    /// Workspace name.
    pub name: Option<SmolStr>,
    /// `files` suffix: list the workspace contents.
    pub files: bool,
}

/// Application or debugger lifecycle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCommand {
    /// Application name (the workspace it was uploaded to).
    pub name: Option<SmolStr>,
    /// Requested lifecycle action.
    pub action: Option<ProgramAction>,
}

/// A parsed device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness check.
    Ping,
    /// Stop the running session.
    Stop,
    /// Controller/port access or stream subscription.
    Controller(ControllerCommand),
    /// Workspace metadata or file listing.
    Workspace(WorkspaceCommand),
    /// Application lifecycle.
    Application(ProgramCommand),
    /// Debugger lifecycle.
    Debugger(ProgramCommand),
    /// Free-text remote command, URL-decoded.
    Remote {
        /// Decoded command text.
        text: String,
    },
}

/// Parse a request path into a [`Command`].
///
/// Anything after `?` is cut off and ignored. The `/api/v1/` prefix is
/// matched case-insensitively.
pub fn parse(path: &str) -> Result<Command, GatewayError> {
    let bare = path.split('?').next().unwrap_or(path);
    let parts: Vec<&str> = bare.split('/').collect();

    // need at least "" / "api" / "v1" / <target>
    if parts.len() < 4 {
        warn!(path, "incomplete url");
        return Err(GatewayError::InvalidRequest(bare.into()));
    }
    if !parts[0].is_empty()
        || !parts[1].eq_ignore_ascii_case("api")
        || !parts[2].eq_ignore_ascii_case("v1")
    {
        warn!(path, "invalid api request");
        return Err(GatewayError::InvalidRequest(bare.into()));
    }

    let rest = &parts[3..];

    // terminal single-segment shortcuts
    if rest.len() == 1 {
        match rest[0] {
            "ping" => return Ok(Command::Ping),
            "stop" => return Ok(Command::Stop),
            _ => {}
        }
    }

    let target = rest[0];
    let mut rest = &rest[1..];

    let command = match target {
        "controller" => Command::Controller(parse_controller(&mut rest)),
        "workspaces" => Command::Workspace(parse_workspace(&mut rest)),
        "application" => Command::Application(parse_program(&mut rest)),
        "debugger" => Command::Debugger(parse_program(&mut rest)),
        "remote" => parse_remote(&mut rest, bare)?,
        other => {
            warn!(target = other, "unexpected target");
            return Err(GatewayError::InvalidRequest(bare.into()));
        }
    };

    if !rest.is_empty() {
        warn!(remaining = ?rest, "unexpected segments after command");
    }

    debug!(?command, "parsed request");
    Ok(command)
}

fn parse_controller(rest: &mut &[&str]) -> ControllerCommand {
    let mut command = ControllerCommand::default();

    // the next segment may be a controller id; if it does not parse as an
    // integer it is re-examined as an interface name
    if let Some(seg) = rest.first() {
        if let Ok(id) = seg.parse::<u32>() {
            command.id = Some(id);
            *rest = &rest[1..];
        }
    }

    if let Some(&seg) = rest.first() {
        if seg != "message-stream" && seg != "stop" {
            let name = SmolStr::new(seg);
            *rest = &rest[1..];
            // the interface may carry its own index
            let id = rest.first().and_then(|seg| seg.parse::<u32>().ok());
            if id.is_some() {
                *rest = &rest[1..];
            }
            command.interface = Some(Interface { name, id });
        }
    }

    if let Some(&seg) = rest.first() {
        match seg {
            "message-stream" => command.stream = true,
            "stop" => command.stop = true,
            other => warn!(segment = other, "unexpected extra segment"),
        }
        *rest = &rest[1..];
    }

    command
}

fn parse_workspace(rest: &mut &[&str]) -> WorkspaceCommand {
    let name = rest.first().map(|seg| SmolStr::new(*seg));
    if name.is_some() {
        *rest = &rest[1..];
    }

    let mut files = false;
    if let Some(&seg) = rest.first() {
        if seg == "files" {
            files = true;
            *rest = &rest[1..];
        } else {
            warn!(segment = seg, "unexpected workspace segment");
        }
    }

    WorkspaceCommand { name, files }
}

fn parse_program(rest: &mut &[&str]) -> ProgramCommand {
    let name = rest.first().map(|seg| SmolStr::new(*seg));
    if name.is_some() {
        *rest = &rest[1..];
    }

    let mut action = None;
    if let Some(&seg) = rest.first() {
        action = ProgramAction::parse(seg);
        if action.is_none() {
            warn!(segment = seg, "unknown program action");
        }
        *rest = &rest[1..];
    }

    ProgramCommand { name, action }
}

fn parse_remote(rest: &mut &[&str], path: &str) -> Result<Command, GatewayError> {
    if rest.len() > 1 && rest[0] == "send-command" {
        let encoded = rest[1];
        let text = urlencoding::decode(encoded)
            .map(std::borrow::Cow::into_owned)
            .unwrap_or_else(|_| encoded.to_string());
        *rest = &rest[2..];
        return Ok(Command::Remote { text });
    }
    warn!(path, "unexpected remote command");
    Err(GatewayError::InvalidRequest(path.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_and_stop_shortcuts() {
        assert_eq!(parse("/api/v1/ping").unwrap(), Command::Ping);
        assert_eq!(parse("/api/v1/stop").unwrap(), Command::Stop);
    }

    #[test]
    fn prefix_is_case_insensitive() {
        assert_eq!(parse("/API/V1/ping").unwrap(), Command::Ping);
    }

    #[test]
    fn query_strings_are_ignored() {
        assert_eq!(parse("/api/v1/ping?cache=0").unwrap(), Command::Ping);
    }

    #[test]
    fn bad_prefix_fails() {
        assert!(parse("/bad").is_err());
        assert!(parse("/api/v2/ping").is_err());
        assert!(parse("/x/api/v1/ping").is_err());
    }

    #[test]
    fn unknown_target_fails() {
        assert!(parse("/api/v1/gadget/1").is_err());
        // shortcuts are only valid as single segments
        assert!(parse("/api/v1/ping/extra").is_err());
    }

    #[test]
    fn bare_controller() {
        let parsed = parse("/api/v1/controller").unwrap();
        assert_eq!(parsed, Command::Controller(ControllerCommand::default()));
    }

    #[test]
    fn controller_with_id_interface_and_port() {
        let parsed = parse("/api/v1/controller/0/counters/2").unwrap();
        let Command::Controller(command) = parsed else {
            panic!("not a controller command");
        };
        assert_eq!(command.id, Some(0));
        assert_eq!(
            command.interface,
            Some(Interface {
                name: SmolStr::new("counters"),
                id: Some(2),
            })
        );
        assert!(!command.stream);
    }

    #[test]
    fn non_numeric_segment_becomes_interface() {
        let parsed = parse("/api/v1/controller/inputs").unwrap();
        let Command::Controller(command) = parsed else {
            panic!("not a controller command");
        };
        assert_eq!(command.id, None);
        assert_eq!(
            command.interface,
            Some(Interface {
                name: SmolStr::new("inputs"),
                id: None,
            })
        );
    }

    #[test]
    fn stream_suffix_preserves_interface() {
        let parsed = parse("/api/v1/controller/0/inputs/message-stream").unwrap();
        let Command::Controller(command) = parsed else {
            panic!("not a controller command");
        };
        assert_eq!(command.id, Some(0));
        assert_eq!(command.interface.as_ref().map(|i| i.name.as_str()), Some("inputs"));
        assert!(command.stream);
    }

    #[test]
    fn bare_message_stream() {
        let parsed = parse("/api/v1/controller/message-stream").unwrap();
        let Command::Controller(command) = parsed else {
            panic!("not a controller command");
        };
        assert_eq!(command.interface, None);
        assert!(command.stream);
    }

    #[test]
    fn controller_stop_suffix() {
        let parsed = parse("/api/v1/controller/stop").unwrap();
        let Command::Controller(command) = parsed else {
            panic!("not a controller command");
        };
        assert!(command.stop);
        assert_eq!(command.interface, None);
    }

    #[test]
    fn workspace_name_and_files() {
        assert_eq!(
            parse("/api/v1/workspaces/demo").unwrap(),
            Command::Workspace(WorkspaceCommand {
                name: Some(SmolStr::new("demo")),
                files: false,
            })
        );
        assert_eq!(
            parse("/api/v1/workspaces/demo/files").unwrap(),
            Command::Workspace(WorkspaceCommand {
                name: Some(SmolStr::new("demo")),
                files: true,
            })
        );
    }

    #[test]
    fn application_start() {
        assert_eq!(
            parse("/api/v1/application/demo/start").unwrap(),
            Command::Application(ProgramCommand {
                name: Some(SmolStr::new("demo")),
                action: Some(ProgramAction::Start),
            })
        );
    }

    #[test]
    fn debugger_paths_share_the_program_grammar() {
        assert_eq!(
            parse("/api/v1/debugger/demo/stop").unwrap(),
            Command::Debugger(ProgramCommand {
                name: Some(SmolStr::new("demo")),
                action: Some(ProgramAction::Stop),
            })
        );
    }

    #[test]
    fn unknown_program_action_is_dropped() {
        let parsed = parse("/api/v1/application/demo/frobnicate").unwrap();
        assert_eq!(
            parsed,
            Command::Application(ProgramCommand {
                name: Some(SmolStr::new("demo")),
                action: None,
            })
        );
    }

    #[test]
    fn remote_command_is_url_decoded() {
        assert_eq!(
            parse("/api/v1/remote/send-command/turn%20on%20light").unwrap(),
            Command::Remote {
                text: "turn on light".to_string(),
            }
        );
    }

    #[test]
    fn remote_without_send_command_fails() {
        assert!(parse("/api/v1/remote/whisper/hello").is_err());
        assert!(parse("/api/v1/remote").is_err());
    }

    #[test]
    fn trailing_garbage_is_tolerated() {
        // extra segments are logged, not fatal
        let parsed = parse("/api/v1/controller/0/inputs/message-stream/later").unwrap();
        let Command::Controller(command) = parsed else {
            panic!("not a controller command");
        };
        assert!(command.stream);
    }
}
