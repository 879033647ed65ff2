use arrayvec::ArrayString;
use core::fmt::Write;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub const EVENT_HISTORY_DEPTH: usize = 64;
pub const MAX_EVENT_TEXT: usize = 128;

/// Event identifiers reported by the housekeeping application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventId {
    Init = 1,
    CommandCodeError = 2,
    CommandLengthError = 3,
    Noop = 4,
    ResetCounters = 5,
    AccessingPastPacketEnd = 6,
    PoolAllocFailed = 7,
    SubscribeFailed = 8,
    PoolFreeFailed = 9,
    UnexpectedCopyTableStatus = 10,
    UnknownCombinedPacket = 11,
    MissingData = 12,
    UnsubscribeFailed = 13,
    PublishFailed = 14,
    TableRejected = 15,
    TableActivated = 16,
    UnexpectedRuntimeTableStatus = 27,
    MessageLengthError = 28,
}

impl EventId {
    pub fn code(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Debug,
    Information,
    Error,
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: EventId,
    pub event_type: EventType,
    pub sequence: u32,
    pub text: ArrayString<MAX_EVENT_TEXT>,
}

/// Bounded history of reported events. Every report is also emitted through `tracing`.
#[derive(Debug)]
pub struct EventLog {
    history: Vec<EventRecord, EVENT_HISTORY_DEPTH>,
    next_sequence: u32,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn report(&mut self, id: EventId, event_type: EventType, args: core::fmt::Arguments<'_>) {
        let mut text = Truncating(ArrayString::new());
        let _ = text.write_fmt(args);
        let text = text.0;

        match event_type {
            EventType::Debug => debug!(event_id = id.code(), "{}", text),
            EventType::Information => info!(event_id = id.code(), "{}", text),
            EventType::Error => error!(event_id = id.code(), "{}", text),
        }

        let record = EventRecord {
            id,
            event_type,
            sequence: self.next_sequence,
            text,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(record);
    }

    pub fn history(&self) -> &[EventRecord] {
        &self.history
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.history.last()
    }

    pub fn count(&self, id: EventId) -> usize {
        self.history.iter().filter(|r| r.id == id).count()
    }
}

struct Truncating(ArrayString<MAX_EVENT_TEXT>);

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.try_push(c).is_err() {
                return Err(core::fmt::Error);
            }
        }
        Ok(())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_evicts_oldest() {
        let mut log = EventLog::new();
        for i in 0..(EVENT_HISTORY_DEPTH + 3) {
            log.report(EventId::Noop, EventType::Information, format_args!("event {}", i));
        }
        assert_eq!(log.history().len(), EVENT_HISTORY_DEPTH);
        assert_eq!(log.history()[0].sequence, 4);
        assert_eq!(log.last().unwrap().text.as_str(), "event 66");
    }

    #[test]
    fn test_long_text_is_truncated() {
        let mut log = EventLog::new();
        let long = "x".repeat(MAX_EVENT_TEXT * 2);
        log.report(EventId::Init, EventType::Information, format_args!("{}", long));
        assert_eq!(log.last().unwrap().text.len(), MAX_EVENT_TEXT);
    }

    #[test]
    fn test_count_by_id() {
        let mut log = EventLog::new();
        log.report(EventId::MissingData, EventType::Debug, format_args!("a"));
        log.report(EventId::UnknownCombinedPacket, EventType::Information, format_args!("b"));
        log.report(EventId::MissingData, EventType::Debug, format_args!("c"));
        assert_eq!(log.count(EventId::MissingData), 2);
        assert_eq!(EventId::AccessingPastPacketEnd.code(), 6);
    }
}
