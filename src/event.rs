//! Event record and ordering policies.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::payload::Payload;

/// An immutable record of one state change on an aggregate.
///
/// `version` is the aggregate version *after* this event is applied. For a
/// given originator the persisted versions form a gap-free sequence starting
/// at 1; the version-1 event is always a construction event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event kind within its aggregate type.
    pub name: String,
    /// Registry bucket and constructor selector.
    pub aggregate_type: String,
    /// Aggregate identity, immutable once assigned.
    pub originator_id: Uuid,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// Bound parameters of the operation that produced this event.
    pub payload: Payload,
}

/// Comparator used to sort events and snapshots before folding.
///
/// Both policies are total orders: the secondary field breaks ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    /// Version ascending, timestamp breaks ties.
    #[default]
    Version,
    /// Timestamp ascending, version breaks ties.
    Timestamp,
}

impl Priority {
    /// Compare two (version, timestamp) keys under this policy.
    pub fn cmp_keys(
        &self,
        a: (u64, DateTime<Utc>),
        b: (u64, DateTime<Utc>),
    ) -> Ordering {
        match self {
            Priority::Version => a.cmp(&b),
            Priority::Timestamp => (a.1, a.0).cmp(&(b.1, b.0)),
        }
    }

    pub fn cmp_events(&self, a: &Event, b: &Event) -> Ordering {
        self.cmp_keys((a.version, a.timestamp), (b.version, b.timestamp))
    }

    pub fn sort(&self, events: &mut [Event]) {
        events.sort_by(|a, b| self.cmp_events(a, b));
    }
}
