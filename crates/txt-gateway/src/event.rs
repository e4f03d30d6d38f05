//! Console event queue and per-client stream multiplexing.
//!
//! The session supervisor and the remote relay publish [`ConsoleEvent`]s
//! into a shared [`EventBus`]; every open `message-stream` connection drains
//! it through its own [`EventStream`]. The queue is a single distribution
//! point: each event reaches exactly one attached stream, which is fine for
//! the expected single IDE viewer.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::{json, Value};
use smol_str::SmolStr;

/// A named port reading inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortValue {
    /// Port label, e.g. `I1` or `C4`.
    pub name: SmolStr,
    /// Current reading.
    pub value: i32,
}

impl PortValue {
    fn new(name: &str, value: i32) -> Self {
        Self {
            name: SmolStr::new(name),
            value,
        }
    }
}

/// One event on its way to a stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// Console reset, sent when a viewer attaches.
    Clear,
    /// One complete line of application output.
    Text(String),
    /// Keepalive marker; has no on-wire entry, the client sees an empty
    /// batch whose failed write exposes a broken connection.
    Ping,
    /// Named port values for the interface test.
    Snapshot(Vec<PortValue>),
}

impl ConsoleEvent {
    /// Render the wire entries of this event. Batches are framed as one
    /// JSON array per `data:` line.
    #[must_use]
    pub fn to_batch(&self) -> Vec<Value> {
        match self {
            Self::Clear => vec![json!({ "type": "clear" })],
            Self::Text(line) => vec![json!({ "type": "text", "data": [line] })],
            Self::Ping => Vec::new(),
            Self::Snapshot(values) => values
                .iter()
                .map(|port| json!({ "name": port.name.as_str(), "value": port.value }))
                .collect(),
        }
    }
}

/// Shared multi-producer console queue.
///
/// Receivers are clones of one channel endpoint, so concurrent streams
/// compete for events instead of each getting a copy.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Sender<ConsoleEvent>,
    rx: Receiver<ConsoleEvent>,
}

impl EventBus {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append an event; never blocks.
    pub fn publish(&self, event: ConsoleEvent) {
        let _ = self.tx.send(event);
    }

    /// A drain endpoint for one stream client.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ConsoleEvent> {
        self.rx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// What a `message-stream` subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Live console output drained from the shared queue.
    Console,
    /// Synthetic input-port snapshots.
    Inputs,
    /// Synthetic counter snapshots.
    Counters,
}

impl StreamKind {
    /// Classify a subscription by the interface name on its path.
    #[must_use]
    pub fn for_interface(name: Option<&str>) -> Self {
        match name {
            Some(name) if name.contains("input") => Self::Inputs,
            Some(name) if name.contains("counter") => Self::Counters,
            _ => Self::Console,
        }
    }
}

/// One client's view of the event source.
///
/// Restartable per connection: every new stream starts with a `clear` on
/// console streams and runs until the transport drops it.
#[derive(Debug)]
pub struct EventStream {
    kind: StreamKind,
    events: Receiver<ConsoleEvent>,
    poll_timeout: Duration,
    snapshot_interval: Duration,
    opened: bool,
}

impl EventStream {
    /// Attach a new client to the shared queue.
    #[must_use]
    pub fn new(
        kind: StreamKind,
        bus: &EventBus,
        poll_timeout: Duration,
        snapshot_interval: Duration,
    ) -> Self {
        Self {
            kind,
            events: bus.subscribe(),
            poll_timeout,
            snapshot_interval,
            opened: false,
        }
    }

    /// Produce the next event, blocking for at most one poll or snapshot
    /// cycle. Never returns an error; an idle queue yields keepalives.
    pub fn next_event(&mut self) -> ConsoleEvent {
        if !self.opened {
            self.opened = true;
            if self.kind == StreamKind::Console {
                return ConsoleEvent::Clear;
            }
        }
        match self.kind {
            StreamKind::Console => self
                .events
                .recv_timeout(self.poll_timeout)
                .unwrap_or(ConsoleEvent::Ping),
            StreamKind::Inputs => {
                thread::sleep(self.snapshot_interval);
                ConsoleEvent::Snapshot(input_snapshot())
            }
            StreamKind::Counters => {
                thread::sleep(self.snapshot_interval);
                ConsoleEvent::Snapshot(counter_snapshot())
            }
        }
    }
}

// Deterministic interface-test values, used by the IDE's protocol
// conformance checks until real hardware is attached.
fn input_snapshot() -> Vec<PortValue> {
    vec![
        PortValue::new("I1", 12),
        PortValue::new("I2", 34),
        PortValue::new("I3", 0),
        PortValue::new("I4", -100),
        PortValue::new("I5", 0),
        PortValue::new("I6", 0),
        PortValue::new("I7", 0),
        PortValue::new("I8", 0),
    ]
}

fn counter_snapshot() -> Vec<PortValue> {
    vec![
        PortValue::new("C1", 12),
        PortValue::new("C2", 34),
        PortValue::new("C3", 0),
        PortValue::new("C4", 0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn stream(kind: StreamKind, bus: &EventBus) -> EventStream {
        EventStream::new(
            kind,
            bus,
            Duration::from_millis(50),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn interface_names_select_the_stream_kind() {
        assert_eq!(StreamKind::for_interface(None), StreamKind::Console);
        assert_eq!(StreamKind::for_interface(Some("motor")), StreamKind::Console);
        assert_eq!(StreamKind::for_interface(Some("inputs")), StreamKind::Inputs);
        assert_eq!(
            StreamKind::for_interface(Some("counters")),
            StreamKind::Counters
        );
    }

    #[test]
    fn console_stream_opens_with_clear() {
        let bus = EventBus::new();
        let mut stream = stream(StreamKind::Console, &bus);
        assert_eq!(stream.next_event(), ConsoleEvent::Clear);
    }

    #[test]
    fn console_stream_drains_the_queue_in_order() {
        let bus = EventBus::new();
        let mut stream = stream(StreamKind::Console, &bus);
        bus.publish(ConsoleEvent::Text("one".into()));
        bus.publish(ConsoleEvent::Text("two".into()));
        assert_eq!(stream.next_event(), ConsoleEvent::Clear);
        assert_eq!(stream.next_event(), ConsoleEvent::Text("one".into()));
        assert_eq!(stream.next_event(), ConsoleEvent::Text("two".into()));
    }

    #[test]
    fn idle_queue_yields_a_keepalive_within_one_poll_cycle() {
        let bus = EventBus::new();
        let mut stream = stream(StreamKind::Console, &bus);
        let _ = stream.next_event();
        let begin = Instant::now();
        assert_eq!(stream.next_event(), ConsoleEvent::Ping);
        assert!(begin.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn snapshot_streams_skip_the_clear_and_repeat() {
        let bus = EventBus::new();
        let mut stream = stream(StreamKind::Counters, &bus);
        for _ in 0..3 {
            let ConsoleEvent::Snapshot(values) = stream.next_event() else {
                panic!("expected a snapshot");
            };
            assert_eq!(values.len(), 4);
            assert_eq!(values[0], PortValue::new("C1", 12));
        }
    }

    #[test]
    fn input_snapshots_cover_all_eight_ports() {
        let bus = EventBus::new();
        let mut stream = stream(StreamKind::Inputs, &bus);
        let ConsoleEvent::Snapshot(values) = stream.next_event() else {
            panic!("expected a snapshot");
        };
        assert_eq!(values.len(), 8);
        assert_eq!(values[3], PortValue::new("I4", -100));
    }

    #[test]
    fn wire_batches() {
        assert_eq!(
            serde_json::to_string(&Value::Array(ConsoleEvent::Clear.to_batch())).unwrap(),
            r#"[{"type":"clear"}]"#
        );
        assert_eq!(
            serde_json::to_string(&Value::Array(
                ConsoleEvent::Text("hello".into()).to_batch()
            ))
            .unwrap(),
            r#"[{"data":["hello"],"type":"text"}]"#
        );
        assert!(ConsoleEvent::Ping.to_batch().is_empty());
    }
}
