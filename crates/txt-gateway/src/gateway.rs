//! HTTP front end.
//!
//! One thread accepts connections, every request is handled on its own
//! thread because `message-stream` subscriptions hold their connection open
//! for as long as the client keeps reading. All replies carry permissive
//! CORS headers; the IDE runs on a foreign origin.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, info, warn};

use crate::command::{self, Command, ControllerCommand, ProgramAction, ProgramCommand, WorkspaceCommand};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::event::{EventBus, EventStream, StreamKind};
use crate::multipart;
use crate::relay::CommandRelay;
use crate::session::SessionSupervisor;
use crate::workspace::WorkspaceStore;

/// The gateway's components, wired once and shared by every request thread.
pub struct Gateway {
    config: GatewayConfig,
    store: WorkspaceStore,
    supervisor: Arc<SessionSupervisor>,
    relay: Arc<CommandRelay>,
    events: EventBus,
}

impl Gateway {
    /// Wire up a gateway from its configuration.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let events = EventBus::new();
        let supervisor = SessionSupervisor::new(
            config.runner.clone(),
            config.ping_interval,
            events.clone(),
        );
        let relay = Arc::new(CommandRelay::new(Arc::clone(&supervisor)));
        let store = WorkspaceStore::new(config.workspaces_root.clone());
        Self {
            config,
            store,
            supervisor,
            relay,
            events,
        }
    }

    /// The session supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    /// The remote command relay.
    #[must_use]
    pub fn relay(&self) -> &Arc<CommandRelay> {
        &self.relay
    }

    /// The shared console event queue.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The workspace store.
    #[must_use]
    pub fn store(&self) -> &WorkspaceStore {
        &self.store
    }

    fn handle(&self, request: Request) {
        let method = request.method().clone();
        let url = request.url().to_string();
        debug!(%method, url, "request");

        // silently reply to preflights
        if method == Method::Options {
            let _ = request.respond(with_cors(Response::empty(200)));
            return;
        }

        let Ok(parsed) = command::parse(&url) else {
            let _ = request.respond(json_response("").with_status_code(StatusCode(404)));
            return;
        };

        match method {
            Method::Get => self.handle_get(request, &parsed),
            Method::Post => self.handle_post(request, &parsed),
            Method::Delete => self.handle_delete(request, &parsed),
            _ => {
                let _ = request.respond(json_response("[]"));
            }
        }
    }

    fn handle_get(&self, request: Request, parsed: &Command) {
        match parsed {
            Command::Workspace(workspace) => self.workspace_get(request, workspace),
            Command::Controller(controller) if controller.stream => {
                self.serve_stream(request, controller);
            }
            // nothing specific to report, send an empty json message
            _ => {
                let _ = request.respond(json_response("[]"));
            }
        }
    }

    fn workspace_get(&self, request: Request, workspace: &WorkspaceCommand) {
        let Some(name) = workspace.name.as_deref() else {
            let _ = request.respond(json_response("").with_status_code(StatusCode(404)));
            return;
        };
        if workspace.files {
            match self.store.list_files(name) {
                Ok(files) => {
                    let body = serde_json::to_string(&files).unwrap_or_else(|_| "[]".into());
                    let _ = request.respond(json_response(body));
                }
                Err(_) => {
                    let _ = request.respond(json_response("").with_status_code(StatusCode(404)));
                }
            }
            return;
        }
        match self.store.project_info(name) {
            Ok(info) => {
                // deliberately not the metadata: an empty reply makes the
                // IDE treat the project as new and upload it again
                debug!(uuid = info.uuid.as_str(), "workspace resolved");
                let _ = request.respond(json_response("[]"));
            }
            Err(_) => {
                let _ = request.respond(json_response("").with_status_code(StatusCode(404)));
            }
        }
    }

    fn serve_stream(&self, request: Request, controller: &ControllerCommand) {
        let kind =
            StreamKind::for_interface(controller.interface.as_ref().map(|i| i.name.as_str()));
        let mut stream = EventStream::new(
            kind,
            &self.events,
            self.config.poll_timeout,
            self.config.snapshot_interval,
        );
        info!(?kind, "stream client attached");

        let response = with_cors(
            Response::empty(200)
                .with_header(Header::from_bytes("Content-Type", "text/event-stream").unwrap()),
        );
        // take over the socket: events must reach the client as they
        // happen, not once a transfer buffer fills up
        let mut connection = request.upgrade("event-stream", response);
        loop {
            let batch = Value::Array(stream.next_event().to_batch());
            let frame = format!("data: {batch}\n\n");
            let sent = connection
                .write_all(frame.as_bytes())
                .and_then(|()| connection.flush());
            if let Err(err) = sent {
                // the only cancellation signal there is
                debug!(%err, "stream client disconnected");
                return;
            }
        }
    }

    fn handle_post(&self, mut request: Request, parsed: &Command) {
        let content_type = request
            .headers()
            .iter()
            .find(|header| header.field.equiv("Content-Type"))
            .map(|header| header.value.as_str().to_string());

        let mut body = Vec::new();
        if request.as_reader().read_to_end(&mut body).is_err() {
            let _ = request.respond(json_response("").with_status_code(StatusCode(400)));
            return;
        }

        if !body.is_empty() {
            match content_type.as_deref() {
                Some(content_type) if content_type.starts_with("application/json") => {
                    // bodies on plain commands are informational only
                    match serde_json::from_slice::<Value>(&body) {
                        Ok(value) => debug!(%value, "json body"),
                        Err(err) => warn!(%err, "json body dropped"),
                    }
                }
                Some(content_type) if content_type.starts_with("multipart/form-data") => {
                    if let Command::Workspace(workspace) = parsed {
                        self.workspace_upload(request, workspace, content_type, &body);
                        return;
                    }
                    warn!(url = request.url(), "multipart body outside a workspace path");
                }
                Some(content_type) => {
                    warn!(content_type, "unexpected content type");
                }
                None => warn!("body without content type"),
            }
        }

        match parsed {
            Command::Application(ProgramCommand {
                name: Some(name),
                action: Some(ProgramAction::Start),
            }) => {
                let response = match self.supervisor.start(name) {
                    Ok(()) => json_response("[]"),
                    Err(GatewayError::SessionBusy) => {
                        json_response(json!({ "error": "session busy" }).to_string())
                            .with_status_code(StatusCode(409))
                    }
                    Err(err) => json_response(json!({ "error": err.to_string() }).to_string())
                        .with_status_code(StatusCode(500)),
                };
                let _ = request.respond(response);
            }
            Command::Remote { text } => {
                self.relay.relay(text);
                let _ = request.respond(json_response("[]"));
            }
            _ => {
                let _ = request.respond(json_response("[]"));
            }
        }
    }

    fn workspace_upload(
        &self,
        request: Request,
        workspace: &WorkspaceCommand,
        content_type: &str,
        body: &[u8],
    ) {
        let Some(name) = workspace.name.as_deref() else {
            let _ = request.respond(json_response("").with_status_code(StatusCode(404)));
            return;
        };
        let files = match multipart::parse(content_type, body) {
            Ok(files) => files,
            Err(err) => {
                warn!(%err, "upload body dropped");
                let _ = request.respond(
                    json_response(json!({ "error": err.to_string() }).to_string())
                        .with_status_code(StatusCode(400)),
                );
                return;
            }
        };
        info!(workspace = name, files = files.len(), "saving upload");
        let response = match self.store.save_files(name, &files) {
            Ok(()) => json_response("[]"),
            Err(err) => json_response(json!({ "error": err.to_string() }).to_string())
                .with_status_code(StatusCode(500)),
        };
        let _ = request.respond(response);
    }

    fn handle_delete(&self, request: Request, parsed: &Command) {
        match parsed {
            Command::Stop
            | Command::Controller(ControllerCommand { stop: true, .. })
            | Command::Application(ProgramCommand {
                action: Some(ProgramAction::Stop),
                ..
            })
            | Command::Debugger(ProgramCommand {
                action: Some(ProgramAction::Stop),
                ..
            }) => self.supervisor.stop(),
            _ => {}
        }
        let _ = request.respond(with_cors(Response::empty(200)));
    }
}

/// Handle on the running HTTP server.
pub struct GatewayServer {
    handle: thread::JoinHandle<()>,
    listen: String,
}

impl GatewayServer {
    /// The address the server is bound to.
    #[must_use]
    pub fn listen(&self) -> &str {
        &self.listen
    }

    /// Block on the accept loop; it normally never exits.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

/// Bind the HTTP server and serve requests until the process exits.
pub fn start_gateway(gateway: Gateway) -> Result<GatewayServer, GatewayError> {
    let listen = gateway.config.listen_addr();
    let server = Server::http(&listen)
        .map_err(|err| GatewayError::Server(format!("bind {listen}: {err}").into()))?;
    info!(listen = listen.as_str(), "gateway listening");

    let gateway = Arc::new(gateway);
    let handle = thread::spawn(move || {
        for request in server.incoming_requests() {
            let gateway = Arc::clone(&gateway);
            thread::spawn(move || gateway.handle(request));
        }
    });

    Ok(GatewayServer { handle, listen })
}

fn with_cors<R: Read>(response: Response<R>) -> Response<R> {
    response
        .with_header(Header::from_bytes("Access-Control-Allow-Headers", "*").unwrap())
        .with_header(Header::from_bytes("Access-Control-Allow-Methods", "*").unwrap())
        .with_header(Header::from_bytes("Access-Control-Allow-Credentials", "true").unwrap())
        .with_header(Header::from_bytes("Access-Control-Allow-Origin", "*").unwrap())
}

fn json_response(body: impl Into<String>) -> Response<std::io::Cursor<Vec<u8>>> {
    with_cors(
        Response::from_string(body.into())
            .with_header(Header::from_bytes("Content-Type", "application/json").unwrap()),
    )
}
