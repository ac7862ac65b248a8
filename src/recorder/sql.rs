//! SQLite recorder.
//!
//! Events are persisted one row per event, payload codec-encoded to JSON
//! text. Saves run inside a held transaction: the first `save` after a
//! commit acquires a connection and opens it, `commit`/`rollback` close it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::codec::TranscoderRegistry;
use crate::event::{Event, Priority};
use crate::recorder::schema::{encode_timestamp, Events, CREATE_EVENTS_TABLE};
use crate::recorder::{GetOptions, Recorder, RecorderError, Result};
use crate::reconstructor::Reconstructor;
use crate::registry::EventRegistry;

struct EventRow {
    originator_id: String,
    version: i64,
    name: String,
    aggregate_type: String,
    timestamp: String,
    payload: String,
}

/// SQLite-backed recorder.
pub struct SqlRecorder {
    name: String,
    rank: u32,
    supported: HashSet<String>,
    reconstructor: Reconstructor,
    codec: Arc<TranscoderRegistry>,
    pool: SqlitePool,
    // Connection holding the open save transaction, if any.
    staged: tokio::sync::Mutex<Option<PoolConnection<Sqlite>>>,
}

impl SqlRecorder {
    pub fn new(
        name: impl Into<String>,
        rank: u32,
        supported: impl IntoIterator<Item = impl Into<String>>,
        registry: Arc<EventRegistry>,
        codec: Arc<TranscoderRegistry>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            name: name.into(),
            rank,
            supported: supported.into_iter().map(Into::into).collect(),
            reconstructor: Reconstructor::new(registry),
            codec,
            pool,
            staged: tokio::sync::Mutex::new(None),
        }
    }

    /// Create the schema if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_EVENTS_TABLE).execute(&self.pool).await?;
        info!(recorder = %self.name, "event schema initialized");
        Ok(())
    }

    fn encode_row(&self, event: &Event) -> Result<EventRow> {
        let version = i64::try_from(event.version)
            .map_err(|_| RecorderError::Corrupt(format!("version {} overflows", event.version)))?;
        let payload = self.codec.encode_payload(&event.payload)?;
        Ok(EventRow {
            originator_id: event.originator_id.to_string(),
            version,
            name: event.name.clone(),
            aggregate_type: event.aggregate_type.clone(),
            timestamp: encode_timestamp(event.timestamp),
            payload: payload.to_string(),
        })
    }

    fn decode_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
        let originator: String = row.try_get("originator_id")?;
        let originator_id = Uuid::parse_str(&originator)
            .map_err(|e| RecorderError::Corrupt(format!("originator_id: {e}")))?;
        let version: i64 = row.try_get("version")?;
        let version = u64::try_from(version)
            .map_err(|_| RecorderError::Corrupt(format!("negative version {version}")))?;
        let timestamp: String = row.try_get("timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| RecorderError::Corrupt(format!("timestamp: {e}")))?
            .to_utc();
        let payload: String = row.try_get("payload")?;
        let payload = serde_json::from_str(&payload)
            .map_err(|e| RecorderError::Corrupt(format!("payload: {e}")))?;
        let payload = self.codec.decode_payload(&payload)?;
        Ok(Event {
            name: row.try_get("name")?,
            aggregate_type: row.try_get("aggregate_type")?,
            originator_id,
            version,
            timestamp,
            payload,
        })
    }

    async fn insert_rows(conn: &mut SqliteConnection, rows: &[EventRow]) -> Result<()> {
        for row in rows {
            let query = Query::insert()
                .into_table(Events::Table)
                .columns([
                    Events::OriginatorId,
                    Events::Version,
                    Events::Name,
                    Events::AggregateType,
                    Events::Timestamp,
                    Events::Payload,
                ])
                .values_panic([
                    row.originator_id.clone().into(),
                    row.version.into(),
                    row.name.clone().into(),
                    row.aggregate_type.clone().into(),
                    row.timestamp.clone().into(),
                    row.payload.clone().into(),
                ])
                .to_string(SqliteQueryBuilder);

            sqlx::query(&query).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Recorder for SqlRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn rank(&self) -> u32 {
        self.rank
    }

    fn supports(&self, aggregate_type: &str) -> bool {
        self.supported.contains(aggregate_type)
    }

    async fn save(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let rows: Vec<EventRow> = events
            .iter()
            .map(|event| self.encode_row(event))
            .collect::<Result<_>>()?;

        let mut staged = self.staged.lock().await;
        let mut conn = match staged.take() {
            Some(conn) => conn,
            None => {
                // BEGIN IMMEDIATE acquires the write lock upfront, preventing
                // deadlocks when concurrent DEFERRED transactions race to
                // upgrade from shared to exclusive.
                let mut conn = self.pool.acquire().await?;
                sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
                conn
            }
        };

        match Self::insert_rows(&mut conn, &rows).await {
            Ok(()) => {
                debug!(recorder = %self.name, count = rows.len(), "staged event rows");
                *staged = Some(conn);
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn get(&self, originator_id: Uuid, options: &GetOptions) -> Result<Box<dyn Aggregate>> {
        // Scoped so the non-Send SelectStatement is dropped before the await.
        let query = {
            let mut select = Query::select();
            select
                .columns([
                    Events::OriginatorId,
                    Events::Version,
                    Events::Name,
                    Events::AggregateType,
                    Events::Timestamp,
                    Events::Payload,
                ])
                .from(Events::Table)
                .and_where(Expr::col(Events::OriginatorId).eq(originator_id.to_string()));
            if let Some(max_version) = options.max_version {
                let max_version = i64::try_from(max_version).unwrap_or(i64::MAX);
                select.and_where(Expr::col(Events::Version).lte(max_version));
            }
            if let Some(max_timestamp) = options.max_timestamp {
                select.and_where(Expr::col(Events::Timestamp).lte(encode_timestamp(max_timestamp)));
            }
            match options.priority {
                Priority::Version => select
                    .order_by(Events::Version, Order::Asc)
                    .order_by(Events::Timestamp, Order::Asc),
                Priority::Timestamp => select
                    .order_by(Events::Timestamp, Order::Asc)
                    .order_by(Events::Version, Order::Asc),
            };
            select.to_string(SqliteQueryBuilder)
        };

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(RecorderError::NotFound(originator_id));
        }
        let events: Vec<Event> = rows
            .iter()
            .map(|row| self.decode_row(row))
            .collect::<Result<_>>()?;
        Ok(self
            .reconstructor
            .reconstruct(events, None, options.priority)?)
    }

    async fn commit(&self) -> Result<()> {
        let mut staged = self.staged.lock().await;
        if let Some(mut conn) = staged.take() {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            debug!(recorder = %self.name, "committed save transaction");
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut staged = self.staged.lock().await;
        if let Some(mut conn) = staged.take() {
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            debug!(recorder = %self.name, "rolled back save transaction");
        }
        Ok(())
    }
}
