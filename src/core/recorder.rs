//! Bounded audit log of wire traffic.
//!
//! Every inbound and outbound message lands here regardless of type, newest
//! first, capped at [`EVENT_LOG_CAPACITY`] entries. The event type shown is
//! derived from the payload shape: the first key of the `event` object when
//! present, otherwise the out-of-band message kind.

use std::collections::VecDeque;

use serde_json::Value;
use time::OffsetDateTime;

/// Maximum retained entries; oldest are evicted first.
pub const EVENT_LOG_CAPACITY: usize = 100;

/// Which way a message travelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// One recorded wire message.
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub timestamp: OffsetDateTime,
    pub direction: Direction,
    pub event_type: String,
    pub payload: Value,
}

/// Fixed-capacity, newest-first event ring.
#[derive(Debug, Default)]
pub struct EventRecorder {
    entries: VecDeque<EventLogEntry>,
}

impl EventRecorder {
    /// Append a wire message, evicting the oldest entry past capacity.
    pub fn record(&mut self, direction: Direction, payload: Value) {
        let entry = EventLogEntry {
            timestamp: OffsetDateTime::now_utc(),
            direction,
            event_type: event_type_of(&payload),
            payload,
        };
        self.entries.push_front(entry);
        self.entries.truncate(EVENT_LOG_CAPACITY);
    }

    /// Entries newest first.
    pub fn entries(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry (console "Clear Events").
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn event_type_of(payload: &Value) -> String {
    if let Some(event) = payload.get("event").and_then(Value::as_object) {
        if let Some(key) = event.keys().next() {
            return key.clone();
        }
    }
    if payload.get("auth").is_some() {
        return "auth".to_string();
    }
    if let Some(kind) = payload.get("type").and_then(Value::as_str) {
        return kind.to_string();
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capacity_is_enforced_newest_first() {
        let mut recorder = EventRecorder::default();
        for i in 0..150 {
            recorder.record(Direction::Out, json!({"event": {"textInput": {"seq": i}}}));
        }
        assert_eq!(recorder.len(), EVENT_LOG_CAPACITY);
        let newest = recorder.entries().next().unwrap();
        assert_eq!(newest.payload["event"]["textInput"]["seq"], 149);
        let oldest = recorder.entries().last().unwrap();
        assert_eq!(oldest.payload["event"]["textInput"]["seq"], 50);
    }

    #[test]
    fn event_type_is_first_event_key() {
        let mut recorder = EventRecorder::default();
        recorder.record(Direction::In, json!({"event": {"audioOutput": {"content": ""}}}));
        assert_eq!(recorder.entries().next().unwrap().event_type, "audioOutput");
    }

    #[test]
    fn out_of_band_messages_use_their_kind() {
        let mut recorder = EventRecorder::default();
        recorder.record(Direction::Out, json!({"auth": {"username": "u"}}));
        recorder.record(Direction::In, json!({"type": "auth_success"}));
        recorder.record(Direction::In, json!({"something": "else"}));
        let types: Vec<_> = recorder.entries().map(|e| e.event_type.clone()).collect();
        assert_eq!(types, ["unknown", "auth_success", "auth"]);
    }

    #[test]
    fn clear_empties_the_log() {
        let mut recorder = EventRecorder::default();
        recorder.record(Direction::In, json!({"type": "auth_success"}));
        recorder.clear();
        assert!(recorder.is_empty());
    }
}
