//! Chaincode event listeners
//!
//! A listener is a pair of patterns, one over channel names and one over
//! event names. Both must match the whole name. Registration returns a
//! [`ListenerHandle`]; the listener stays active until that handle is
//! explicitly unregistered, which also discards what it captured.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Event listener errors
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid listener pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown event listener: {0}")]
    UnknownListener(String),
}

/// Opaque token identifying one registered listener
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ListenerHandle(String);

impl ListenerHandle {
    fn generate() -> Self {
        Self(format!("CHAINCODE_EVENTS_HANDLE{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Block that carried a chaincode event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockEvent {
    pub channel: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub event_name: String,
    pub transaction_id: String,
    pub payload: Vec<u8>,
}

/// One event delivered to one listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCapture {
    pub handle: ListenerHandle,
    pub block: BlockEvent,
    pub event: ChaincodeEvent,
}

struct Listener {
    channel: Regex,
    event: Regex,
}

/// Registered listeners and the events they captured
pub struct ChaincodeEventRegistry {
    listeners: Mutex<BTreeMap<ListenerHandle, Listener>>,
    captures: Mutex<Vec<EventCapture>>,
}

fn anchored(pattern: &str) -> Result<Regex, EventError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| EventError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChaincodeEventRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(BTreeMap::new()),
            captures: Mutex::new(Vec::new()),
        }
    }

    pub fn register(
        &self,
        channel_pattern: &str,
        event_pattern: &str,
    ) -> Result<ListenerHandle, EventError> {
        let listener = Listener {
            channel: anchored(channel_pattern)?,
            event: anchored(event_pattern)?,
        };
        let handle = ListenerHandle::generate();
        lock(&self.listeners).insert(handle.clone(), listener);

        debug!(
            handle = %handle,
            channel_pattern = %channel_pattern,
            event_pattern = %event_pattern,
            "Registered chaincode event listener"
        );
        Ok(handle)
    }

    pub fn unregister(&self, handle: &ListenerHandle) -> Result<(), EventError> {
        if lock(&self.listeners).remove(handle).is_none() {
            return Err(EventError::UnknownListener(handle.to_string()));
        }
        let mut captures = lock(&self.captures);
        let before = captures.len();
        captures.retain(|c| &c.handle != handle);
        debug!(
            handle = %handle,
            discarded = before - captures.len(),
            "Unregistered chaincode event listener"
        );
        Ok(())
    }

    pub fn is_registered(&self, handle: &ListenerHandle) -> bool {
        lock(&self.listeners).contains_key(handle)
    }

    /// Deliver an event to every matching listener; returns how many matched
    pub fn dispatch(&self, block: &BlockEvent, event: &ChaincodeEvent) -> usize {
        let matched: Vec<ListenerHandle> = lock(&self.listeners)
            .iter()
            .filter(|(_, l)| {
                l.channel.is_match(&block.channel) && l.event.is_match(&event.event_name)
            })
            .map(|(handle, _)| handle.clone())
            .collect();

        let mut captures = lock(&self.captures);
        captures.extend(matched.iter().map(|handle| EventCapture {
            handle: handle.clone(),
            block: block.clone(),
            event: event.clone(),
        }));
        matched.len()
    }

    /// Events captured so far by `handle`, in delivery order
    pub fn captures(&self, handle: &ListenerHandle) -> Vec<EventCapture> {
        lock(&self.captures)
            .iter()
            .filter(|c| &c.handle == handle)
            .cloned()
            .collect()
    }

    /// Registered listeners whose channel pattern matches `channel`
    pub fn listeners_for_channel(&self, channel: &str) -> usize {
        lock(&self.listeners)
            .values()
            .filter(|l| l.channel.is_match(channel))
            .count()
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChaincodeEventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChaincodeEventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaincodeEventRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(channel: &str) -> BlockEvent {
        BlockEvent {
            channel: channel.to_string(),
            block_number: 4,
        }
    }

    fn event(name: &str) -> ChaincodeEvent {
        ChaincodeEvent {
            chaincode_id: "example_cc_go".to_string(),
            event_name: name.to_string(),
            transaction_id: "tx-9".to_string(),
            payload: b"!".to_vec(),
        }
    }

    #[test]
    fn test_patterns_match_whole_names() {
        let events = ChaincodeEventRegistry::new();
        let handle = events.register(".*", "event").unwrap();

        assert_eq!(events.dispatch(&block("foo"), &event("event")), 1);
        assert_eq!(events.dispatch(&block("foo"), &event("events")), 0);
        assert_eq!(events.dispatch(&block("foo"), &event("my-event")), 0);

        let captures = events.captures(&handle);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].block.block_number, 4);
        assert_eq!(captures[0].event.transaction_id, "tx-9");
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let events = ChaincodeEventRegistry::new();
        let handle = events.register("foo", ".*").unwrap();

        events.unregister(&handle).unwrap();
        assert_eq!(events.dispatch(&block("foo"), &event("event")), 0);
        assert!(!events.is_registered(&handle));
        assert!(matches!(
            events.unregister(&handle),
            Err(EventError::UnknownListener(_))
        ));
    }

    #[test]
    fn test_handles_are_unique() {
        let events = ChaincodeEventRegistry::new();
        let a = events.register(".*", ".*").unwrap();
        let b = events.register(".*", ".*").unwrap();

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("CHAINCODE_EVENTS_HANDLE"));
        assert_eq!(events.len(), 2);
        assert_eq!(events.dispatch(&block("bar"), &event("x")), 2);
    }

    #[test]
    fn test_listeners_for_channel() {
        let events = ChaincodeEventRegistry::new();
        events.register("foo", ".*").unwrap();
        events.register("f.*", ".*").unwrap();
        events.register("bar", ".*").unwrap();

        assert_eq!(events.listeners_for_channel("foo"), 2);
        assert_eq!(events.listeners_for_channel("bar"), 1);
        assert_eq!(events.listeners_for_channel("baz"), 0);
    }

    #[test]
    fn test_invalid_pattern() {
        let events = ChaincodeEventRegistry::new();
        assert!(matches!(
            events.register("(", ".*"),
            Err(EventError::InvalidPattern { .. })
        ));
        assert!(events.is_empty());
    }

    #[test]
    fn test_unregister_discards_captures() {
        let events = ChaincodeEventRegistry::new();
        let kept = events.register(".*", ".*").unwrap();
        let dropped = events.register("foo", ".*").unwrap();
        events.dispatch(&block("foo"), &event("event"));
        events.dispatch(&block("foo"), &event("event"));

        events.unregister(&dropped).unwrap();

        assert!(events.captures(&dropped).is_empty());
        assert_eq!(events.captures(&kept).len(), 2);
    }
}
