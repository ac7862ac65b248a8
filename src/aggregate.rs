//! Aggregate capability traits and the event-capture protocol.
//!
//! An aggregate never persists state directly: every mutating operation calls
//! [`EventSourced::record`] before running its body, which buffers an
//! [`Event`] and bumps the version. The buffer is drained exactly once per
//! save cycle via `collect`.

use std::any::Any;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event::Event;
use crate::payload::{Payload, Value};

/// Bookkeeping every aggregate embeds: identity, version, last-update
/// timestamp, and the not-yet-persisted event buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateMeta {
    id: Uuid,
    version: u64,
    last_update: DateTime<Utc>,
    unsaved: Vec<Event>,
}

impl AggregateMeta {
    /// Fresh identity at version 0. The construction event takes it to 1.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 0,
            last_update: DateTime::UNIX_EPOCH,
            unsaved: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn unsaved(&self) -> &[Event] {
        &self.unsaved
    }

    /// Drain the unsaved buffer, leaving it empty.
    pub fn collect(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.unsaved)
    }

    pub(crate) fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn set_last_update(&mut self, last_update: DateTime<Utc>) {
        self.last_update = last_update;
    }

    pub(crate) fn push_unsaved(&mut self, event: Event) {
        self.unsaved.push(event);
    }
}

impl Default for AggregateMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability trait implemented by every event-sourced entity.
///
/// Implementors embed an [`AggregateMeta`] and expose it through `meta` /
/// `meta_mut`; everything else is provided. Domain methods follow the
/// capture protocol: call [`record`](EventSourced::record) with the bound
/// parameters, then run the mutation body.
pub trait EventSourced: Clone + Send + 'static {
    /// Type tag identifying this aggregate type in the registry and in
    /// recorder routing.
    const AGGREGATE_TYPE: &'static str;

    fn meta(&self) -> &AggregateMeta;

    fn meta_mut(&mut self) -> &mut AggregateMeta;

    /// Capture one state change: stamp, bump version, buffer the event.
    ///
    /// A `timestamp` payload entry is treated as an explicit event time and
    /// removed from the payload; otherwise the event is stamped with now.
    /// The caller's mutation body runs after this returns; a body that fails
    /// leaves the buffered event in place.
    fn record(&mut self, name: &str, mut payload: Payload) {
        let timestamp = match payload.remove("timestamp") {
            Some(Value::Timestamp(ts)) => ts,
            Some(other) => {
                // Not a timestamp: leave the parameter where it was.
                payload.insert("timestamp", other);
                Utc::now()
            }
            None => Utc::now(),
        };

        let meta = self.meta_mut();
        let version = meta.version() + 1;
        meta.set_version(version);
        meta.set_last_update(timestamp);
        let event = Event {
            name: name.to_owned(),
            aggregate_type: Self::AGGREGATE_TYPE.to_owned(),
            originator_id: meta.id(),
            version,
            timestamp,
            payload,
        };
        meta.push_unsaved(event);
    }
}

/// Object-safe view of an aggregate, used by recorders and the
/// reconstructor. Blanket-implemented for every [`EventSourced`] type.
pub trait Aggregate: Send {
    fn aggregate_type(&self) -> &'static str;

    fn id(&self) -> Uuid;

    fn version(&self) -> u64;

    fn last_update(&self) -> DateTime<Utc>;

    fn unsaved(&self) -> &[Event];

    /// Drain the unsaved buffer. Never partial: all or nothing.
    fn collect(&mut self) -> Vec<Event>;

    fn clone_box(&self) -> Box<dyn Aggregate>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<A: EventSourced> Aggregate for A {
    fn aggregate_type(&self) -> &'static str {
        A::AGGREGATE_TYPE
    }

    fn id(&self) -> Uuid {
        self.meta().id()
    }

    fn version(&self) -> u64 {
        self.meta().version()
    }

    fn last_update(&self) -> DateTime<Utc> {
        self.meta().last_update()
    }

    fn unsaved(&self) -> &[Event] {
        self.meta().unsaved()
    }

    fn collect(&mut self) -> Vec<Event> {
        self.meta_mut().collect()
    }

    fn clone_box(&self) -> Box<dyn Aggregate> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Clone for Box<dyn Aggregate> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Account;
    use chrono::TimeZone;

    #[test]
    fn test_version_counts_operations() {
        let mut account = Account::open("alice");
        account.add(100);
        account.subtract(40);

        assert_eq!(account.meta().version(), 3);
        assert_eq!(account.balance, 60);
    }

    #[test]
    fn test_events_are_buffered_in_order_with_positional_versions() {
        let mut account = Account::open("alice");
        account.add(100);
        account.subtract(40);

        let events = Aggregate::collect(&mut account);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].name, "opened");
        assert_eq!(events[1].name, "added");
        assert_eq!(events[2].name, "subtracted");
        for (position, event) in events.iter().enumerate() {
            assert_eq!(event.version, position as u64 + 1);
            assert_eq!(event.originator_id, account.meta().id());
            assert_eq!(event.aggregate_type, "Account");
        }
        assert_eq!(
            events[1].payload.get("amount").and_then(Value::as_int),
            Some(100)
        );
    }

    #[test]
    fn test_collect_drains_buffer_exactly_once() {
        let mut account = Account::open("alice");
        account.add(10);

        assert_eq!(Aggregate::collect(&mut account).len(), 2);
        assert!(Aggregate::collect(&mut account).is_empty());
        // Version is untouched by collection.
        assert_eq!(account.meta().version(), 2);
    }

    #[test]
    fn test_explicit_timestamp_parameter_becomes_event_time() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut account = Account::open("alice");
        account.record("added", Payload::new().with("amount", 5).with("timestamp", at));

        let events = Aggregate::collect(&mut account);
        let event = events.last().unwrap();
        assert_eq!(event.timestamp, at);
        assert_eq!(account.meta().last_update(), at);
        // The timestamp parameter is consumed, not persisted as payload.
        assert!(event.payload.get("timestamp").is_none());
    }

    #[test]
    fn test_failed_body_keeps_buffered_event() {
        let mut account = Account::open("alice");
        let result = account.withdraw_checked(100);

        assert!(result.is_err());
        // The capture ran before the body rejected the operation: the event
        // stays buffered and the version stays bumped.
        assert_eq!(account.meta().version(), 2);
        assert_eq!(account.meta().unsaved().len(), 2);
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn test_clone_box_preserves_state() {
        let mut account = Account::open("alice");
        account.add(25);

        let snapshot: Box<dyn Aggregate> = account.clone_box();
        assert_eq!(snapshot.version(), 2);
        assert_eq!(snapshot.id(), account.meta().id());
        let concrete = snapshot.as_any().downcast_ref::<Account>().unwrap();
        assert_eq!(concrete, &account);
    }
}
