//! Common types for the SEST environment abstraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Virtual time in integer ticks (conventionally milliseconds).
pub type VirtualTime = u64;

/// Event priority. Lower values are more urgent.
pub type Priority = i32;

/// Priority given to events that do not ask for one.
pub const DEFAULT_PRIORITY: Priority = 0;

/// Identifier assigned to an event when it is sent.
///
/// Ids are allocated sequentially per synchronizer, so they double as the
/// send order of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The live state of one service.
///
/// `status` is the discriminator transitions match against; `data` is an
/// arbitrary payload owned by the service's state machine. States are
/// replaced, never mutated in place, on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Current status (e.g. "idle", "processing")
    pub status: String,

    /// Arbitrary payload carried by the state
    pub data: Value,
}

impl ServiceState {
    /// Creates a state with the given status and data.
    pub fn new(status: impl Into<String>, data: Value) -> Self {
        Self {
            status: status.into(),
            data,
        }
    }

    /// Creates a state with the given status and `null` data.
    pub fn with_status(status: impl Into<String>) -> Self {
        Self::new(status, Value::Null)
    }
}

/// What a caller asks to deliver.
///
/// Built with [`EventRequest::new`] and refined with the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRequest {
    /// Target service name
    pub service: String,

    /// Event name matched against transitions
    pub name: String,

    /// Payload handed to the transition action
    pub payload: Value,

    /// Queue priority (lower = earlier)
    pub priority: Priority,

    /// Absolute virtual time at which the transition takes effect
    pub scheduled_at: Option<VirtualTime>,
}

impl EventRequest {
    /// Creates an immediate request with default priority.
    pub fn new(service: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            payload,
            priority: DEFAULT_PRIORITY,
            scheduled_at: None,
        }
    }

    /// Sets the queue priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Defers the transition until virtual time reaches `time`.
    pub fn scheduled_at(mut self, time: VirtualTime) -> Self {
        self.scheduled_at = Some(time);
        self
    }
}

/// An event in flight through the middleware chain and the pending queue.
///
/// Middleware receives it mutably and may reshape delivery (for example by
/// pushing `scheduled_at` later) before it is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Send-order identifier
    pub id: EventId,

    /// Target service name
    pub service: String,

    /// Event name matched against transitions
    pub name: String,

    /// Payload handed to the transition action
    pub payload: Value,

    /// Queue priority (lower = earlier)
    pub priority: Priority,

    /// Absolute virtual time at which the transition takes effect
    pub scheduled_at: Option<VirtualTime>,
}

impl Event {
    /// Builds an event from a request and its allocated id.
    pub fn from_request(id: EventId, request: EventRequest) -> Self {
        Self {
            id,
            service: request.service,
            name: request.name,
            payload: request.payload,
            priority: request.priority,
            scheduled_at: request.scheduled_at,
        }
    }

    /// Returns true if the transition is deferred to a later virtual time.
    pub fn is_deferred(&self) -> bool {
        self.scheduled_at.is_some()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}::{}", self.id, self.service, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let request = EventRequest::new("serviceA", "start", json!({"x": 1}))
            .with_priority(3)
            .scheduled_at(1000);

        assert_eq!(request.service, "serviceA");
        assert_eq!(request.priority, 3);
        assert_eq!(request.scheduled_at, Some(1000));
    }

    #[test]
    fn test_event_from_request_defaults() {
        let request = EventRequest::new("serviceB", "request", Value::Null);
        let event = Event::from_request(EventId(7), request);

        assert_eq!(event.id, EventId(7));
        assert_eq!(event.priority, DEFAULT_PRIORITY);
        assert!(!event.is_deferred());
        assert_eq!(event.to_string(), "#7 serviceB::request");
    }

    #[test]
    fn test_service_state_clone_is_deep() {
        let original = ServiceState::new("idle", json!({"nested": {"count": 1}}));
        let mut copy = original.clone();
        copy.data["nested"]["count"] = json!(2);

        assert_eq!(original.data["nested"]["count"], json!(1));
    }
}
