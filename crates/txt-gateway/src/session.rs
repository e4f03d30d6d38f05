//! Application session supervision.
//!
//! At most one user application runs at a time. The supervisor owns the
//! child process and its two duplex channels: the console channel whose
//! read side carries the child's standard output, and the command channel
//! whose write side feeds the child's standard input with newline-terminated
//! JSON messages. Both sides of the pseudo-terminal stay line-buffered, so
//! an interactive application behaves the same under the gateway as on a
//! real console.
//!
//! All state changes go through one mutex-guarded slot; the background
//! reader and external start/stop requests never touch the child directly.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::event::{ConsoleEvent, EventBus};

/// Control messages written into the child's command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Periodic liveness probe.
    Ping,
    /// Relayed remote command text.
    Remote(String),
}

impl ControlMessage {
    /// The newline-terminated JSON line written to the child appends `\n`
    /// to this value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Ping => json!({ "ping": null }),
            Self::Remote(text) => json!({ "remote": text }),
        }
    }
}

/// Folds raw console bytes into complete lines, carriage returns stripped.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Absorb a chunk and return the lines it completed; a trailing partial
    /// line stays buffered until a later newline terminates it.
    pub(crate) fn push(&mut self, chunk: &str) -> Vec<String> {
        for ch in chunk.chars() {
            if ch != '\r' {
                self.pending.push(ch);
            }
        }
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            lines.push(self.pending[..pos].to_string());
            self.pending.drain(..=pos);
        }
        lines
    }
}

type CommandWriter = Arc<Mutex<Box<dyn Write + Send>>>;

struct Session {
    child: Box<dyn Child + Send + Sync>,
    writer: CommandWriter,
    alive: Arc<AtomicBool>,
    generation: u64,
    // dropping the master closes both channels
    _master: Box<dyn MasterPty + Send>,
}

/// Owner of the at-most-one application session.
pub struct SessionSupervisor {
    slot: Mutex<Option<Session>>,
    events: EventBus,
    runner: PathBuf,
    ping_interval: Duration,
    generation: AtomicU64,
}

impl SessionSupervisor {
    /// A supervisor that runs applications through `runner` and publishes
    /// console lines to `events`.
    #[must_use]
    pub fn new(runner: PathBuf, ping_interval: Duration, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            events,
            runner,
            ping_interval,
            generation: AtomicU64::new(0),
        })
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an application session is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock_slot()
            .as_ref()
            .is_some_and(|session| session.alive.load(Ordering::SeqCst))
    }

    /// Spawn `<runner> <app>` attached to a fresh pseudo-terminal and start
    /// draining its console. Rejected while a session is running; a session
    /// that already exited is reaped first.
    pub fn start(self: &Arc<Self>, app: &str) -> Result<(), GatewayError> {
        let mut slot = self.lock_slot();
        if let Some(session) = slot.as_mut() {
            if session.alive.load(Ordering::SeqCst) {
                warn!(app, "start rejected, session busy");
                return Err(GatewayError::SessionBusy);
            }
            let _ = session.child.wait();
        }
        *slot = None;

        info!(app, runner = %self.runner.display(), "starting application");
        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| GatewayError::Spawn(format!("openpty: {err}").into()))?;

        let mut command = CommandBuilder::new(&self.runner);
        command.arg(app);

        let child = pair.slave.spawn_command(command).map_err(|err| {
            GatewayError::Spawn(format!("{}: {err}", self.runner.display()).into())
        })?;
        // the child keeps its own handle on the slave side
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| GatewayError::Spawn(format!("console channel: {err}").into()))?;
        let writer: CommandWriter = Arc::new(Mutex::new(pair.master.take_writer().map_err(
            |err| GatewayError::Spawn(format!("command channel: {err}").into()),
        )?));

        let alive = Arc::new(AtomicBool::new(true));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let supervisor = Arc::clone(self);
        thread::spawn(move || console_listener(&supervisor, reader, generation));
        let ping_writer = Arc::clone(&writer);
        let ping_alive = Arc::clone(&alive);
        let ping_interval = self.ping_interval;
        thread::spawn(move || ping_loop(&ping_writer, &ping_alive, ping_interval));

        *slot = Some(Session {
            child,
            writer,
            alive,
            generation,
            _master: pair.master,
        });
        Ok(())
    }

    /// Signal the running application to terminate and tear the session
    /// down. A stop with no active session is a reported no-op.
    pub fn stop(&self) {
        let mut slot = self.lock_slot();
        let Some(mut session) = slot.take() else {
            debug!("stop requested with no active session");
            return;
        };
        info!("stopping running application");
        session.alive.store(false, Ordering::SeqCst);
        if let Err(err) = session.child.kill() {
            debug!(%err, "kill failed");
        }
        let _ = session.child.wait();
        // the session drops here: both channels close and the console
        // listener observes end-of-data
    }

    /// Serialize a control message into the command channel. Returns whether
    /// a session was there to receive it; without one the message is
    /// dropped with a log line.
    pub fn send(&self, message: &ControlMessage) -> Result<bool, GatewayError> {
        let slot = self.lock_slot();
        let Some(session) = slot.as_ref() else {
            debug!(?message, "no active session, command dropped");
            return Ok(false);
        };
        write_message(&session.writer, message)
            .map_err(|err| GatewayError::ChannelWrite(format!("{err}").into()))?;
        Ok(true)
    }

    // Reader-side teardown once the console channel runs dry. Guarded by
    // the generation so a reader outliving an explicit stop cannot clear a
    // newer session.
    fn reap(&self, generation: u64) {
        let mut slot = self.lock_slot();
        let Some(session) = slot.as_mut() else {
            return;
        };
        if session.generation != generation {
            return;
        }
        session.alive.store(false, Ordering::SeqCst);
        let _ = session.child.wait();
        *slot = None;
        info!("application session finished");
    }
}

fn console_listener(
    supervisor: &Arc<SessionSupervisor>,
    mut reader: Box<dyn Read + Send>,
    generation: u64,
) {
    let mut buffer = LineBuffer::default();
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]);
                for line in buffer.push(&text) {
                    supervisor.events.publish(ConsoleEvent::Text(line));
                }
            }
            Err(err) => {
                // raised instead of EOF once the child side is gone
                debug!(%err, "console channel closed");
                break;
            }
        }
    }
    debug!("console listener done");
    supervisor.reap(generation);
}

fn ping_loop(writer: &CommandWriter, alive: &Arc<AtomicBool>, interval: Duration) {
    loop {
        thread::sleep(interval);
        if !alive.load(Ordering::SeqCst) {
            break;
        }
        if let Err(err) = write_message(writer, &ControlMessage::Ping) {
            debug!(%err, "ping write failed");
            break;
        }
    }
}

fn write_message(writer: &CommandWriter, message: &ControlMessage) -> std::io::Result<()> {
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(writer, "{}", message.to_json())?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_fold_into_complete_lines() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push("line1\nline2\n"), vec!["line1", "line2"]);
        // the partial tail stays buffered until a later newline
        assert_eq!(buffer.push("partial"), Vec::<String>::new());
        assert_eq!(buffer.push(" done\n"), vec!["partial done"]);
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push("a\r\nb\r\n"), vec!["a", "b"]);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push("\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn control_messages_serialize_to_the_wire_protocol() {
        assert_eq!(ControlMessage::Ping.to_json().to_string(), r#"{"ping":null}"#);
        assert_eq!(
            ControlMessage::Remote("turn on light".into()).to_json().to_string(),
            r#"{"remote":"turn on light"}"#
        );
    }
}
