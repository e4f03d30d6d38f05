//! Remote command relay.
//!
//! Free-text commands (e.g. voice control phrases) arriving over
//! `/remote/send-command/` are forwarded into the running application's
//! command channel. Without an active session they are broadcast to any
//! in-process listeners instead, so controller-level commands keep working
//! while no application runs. Best-effort, fire-and-forget.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::session::{ControlMessage, SessionSupervisor};

/// An in-process consumer of remote commands.
pub type RemoteListener = Box<dyn Fn(&str) + Send + Sync>;

/// Fans remote commands out to the session or to registered listeners.
pub struct CommandRelay {
    supervisor: Arc<SessionSupervisor>,
    listeners: Mutex<Vec<RemoteListener>>,
}

impl CommandRelay {
    /// A relay in front of `supervisor`.
    #[must_use]
    pub fn new(supervisor: Arc<SessionSupervisor>) -> Self {
        Self {
            supervisor,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener for commands arriving while no session runs.
    pub fn register(&self, listener: RemoteListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Deliver one remote command. Failures are logged, never raised.
    pub fn relay(&self, text: &str) {
        debug!(text, "remote command");
        match self.supervisor.send(&ControlMessage::Remote(text.to_string())) {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                warn!(%err, "remote command not delivered to session");
                return;
            }
        }
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::event::EventBus;

    fn idle_relay() -> CommandRelay {
        let supervisor = SessionSupervisor::new(
            PathBuf::from("/bin/true"),
            Duration::from_secs(1),
            EventBus::new(),
        );
        CommandRelay::new(supervisor)
    }

    #[test]
    fn listeners_receive_commands_while_no_session_runs() {
        let relay = idle_relay();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        relay.register(Box::new(move |text| {
            assert_eq!(text, "turn on light");
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        relay.relay("turn on light");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn relay_without_listeners_is_a_no_op() {
        let relay = idle_relay();
        relay.relay("anyone there");
    }
}
