//! Persistence adapters.
//!
//! A recorder is a named, ranked adapter for one storage technology. The
//! [`crate::store::RecorderStore`] routes saves to every recorder that
//! supports the aggregate's type and falls back across recorders on get.

pub mod memory;
pub mod schema;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::codec::CodecError;
use crate::event::{Event, Priority};
use crate::reconstructor::ReconstructionError;

/// Retrieval bounds and ordering for [`Recorder::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Keep only snapshots and events at or below this version.
    pub max_version: Option<u64>,
    /// Keep only snapshots and events at or before this instant.
    pub max_timestamp: Option<DateTime<Utc>>,
    pub priority: Priority,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_version(mut self, version: u64) -> Self {
        self.max_version = Some(version);
        self
    }

    pub fn max_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.max_timestamp = Some(timestamp);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Failures surfaced by recorder implementations.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// Recoverable: the store falls back to the next recorder.
    #[error("aggregate {0} not found")]
    NotFound(Uuid),

    /// The recorder knows the aggregate but holds no event for it.
    #[error("no events recorded for {0}")]
    NoEvents(Uuid),

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("failed to build query: {0}")]
    QueryBuild(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Backend-specific failure, also used for injected test failures.
    #[error("backend failure: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

/// One storage backend: staged saves with commit/rollback, bounded get.
///
/// `save` stages events without making them visible; `commit` publishes the
/// staged batch and `rollback` discards it. Rolling back with nothing staged
/// is a no-op, never an error.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Unique key for direct lookup.
    fn name(&self) -> &str;

    /// Save ordering and get-fallback priority, ascending.
    fn rank(&self) -> u32;

    fn supports(&self, aggregate_type: &str) -> bool;

    async fn save(&self, events: &[Event]) -> Result<()>;

    async fn get(&self, originator_id: Uuid, options: &GetOptions) -> Result<Box<dyn Aggregate>>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}
