//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::Iden;

/// Events table schema.
#[derive(Iden)]
pub enum Events {
    Table,
    #[iden = "originator_id"]
    OriginatorId,
    #[iden = "version"]
    Version,
    #[iden = "name"]
    Name,
    #[iden = "aggregate_type"]
    AggregateType,
    #[iden = "timestamp"]
    Timestamp,
    #[iden = "payload"]
    Payload,
}

/// SQL for creating the events table.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    originator_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    name TEXT NOT NULL,
    aggregate_type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (originator_id, version)
);

CREATE INDEX IF NOT EXISTS idx_events_originator ON events(originator_id);
CREATE INDEX IF NOT EXISTS idx_events_originator_timestamp ON events(originator_id, timestamp);
"#;

/// Timestamps are stored as fixed-width RFC 3339 text so that SQL string
/// comparison matches chronological order.
pub fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encoded_timestamps_compare_lexicographically() {
        let early = encode_timestamp(Utc.timestamp_opt(100, 0).unwrap());
        let late = encode_timestamp(Utc.timestamp_opt(100, 1_000).unwrap());
        assert!(early < late);
        // Fixed width regardless of subsecond content.
        assert_eq!(early.len(), late.len());
    }

    #[test]
    fn test_iden_renders_column_names() {
        assert_eq!(Events::Table.to_string(), "events");
        assert_eq!(Events::OriginatorId.to_string(), "originator_id");
        assert_eq!(Events::AggregateType.to_string(), "aggregate_type");
    }
}
