//! In-memory recorders.
//!
//! [`MemoryRecorder`] keeps an unbounded event log per originator.
//! [`SnapshotMemoryRecorder`] keeps bounded snapshot and event logs and
//! reconstructs from the best snapshot plus the events past it.
//!
//! Both stage saved events in a pending buffer: `commit` publishes the batch,
//! `rollback` discards it. Both expose failure injection for exercising the
//! store's rollback path in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::cache::BoundedLog;
use crate::event::Event;
use crate::recorder::{GetOptions, Recorder, RecorderError, Result};
use crate::reconstructor::Reconstructor;
use crate::registry::EventRegistry;

fn within_bounds(event: &Event, options: &GetOptions) -> bool {
    if let Some(max_version) = options.max_version {
        if event.version > max_version {
            return false;
        }
    }
    if let Some(max_timestamp) = options.max_timestamp {
        if event.timestamp > max_timestamp {
            return false;
        }
    }
    true
}

#[derive(Default)]
struct FailureFlags {
    on_save: bool,
    on_commit: bool,
    on_rollback: bool,
}

impl FailureFlags {
    fn check(&self, armed: bool, operation: &str, name: &str) -> Result<()> {
        if armed {
            return Err(RecorderError::Backend(format!(
                "injected {operation} failure in {name}"
            )));
        }
        Ok(())
    }
}

struct MemoryState {
    staged: Vec<Event>,
    published: HashMap<Uuid, Vec<Event>>,
    failures: FailureFlags,
}

/// Unbounded in-memory event recorder.
pub struct MemoryRecorder {
    name: String,
    rank: u32,
    supported: HashSet<String>,
    reconstructor: Reconstructor,
    state: Mutex<MemoryState>,
}

impl MemoryRecorder {
    pub fn new(
        name: impl Into<String>,
        rank: u32,
        supported: impl IntoIterator<Item = impl Into<String>>,
        registry: Arc<EventRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            rank,
            supported: supported.into_iter().map(Into::into).collect(),
            reconstructor: Reconstructor::new(registry),
            state: Mutex::new(MemoryState {
                staged: Vec::new(),
                published: HashMap::new(),
                failures: FailureFlags::default(),
            }),
        }
    }

    pub async fn set_fail_on_save(&self, fail: bool) {
        self.state.lock().await.failures.on_save = fail;
    }

    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.lock().await.failures.on_commit = fail;
    }

    pub async fn set_fail_on_rollback(&self, fail: bool) {
        self.state.lock().await.failures.on_rollback = fail;
    }

    /// Number of events staged but not yet committed.
    pub async fn staged_len(&self) -> usize {
        self.state.lock().await.staged.len()
    }

    /// Published events for one originator, oldest first.
    pub async fn published(&self, originator_id: Uuid) -> Vec<Event> {
        self.state
            .lock()
            .await
            .published
            .get(&originator_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
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
        let mut state = self.state.lock().await;
        state.failures.check(state.failures.on_save, "save", &self.name)?;
        state.staged.extend_from_slice(events);
        debug!(recorder = %self.name, count = events.len(), "staged events");
        Ok(())
    }

    async fn get(&self, originator_id: Uuid, options: &GetOptions) -> Result<Box<dyn Aggregate>> {
        let state = self.state.lock().await;
        let events: Vec<Event> = state
            .published
            .get(&originator_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| within_bounds(e, options))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if events.is_empty() {
            return Err(RecorderError::NotFound(originator_id));
        }
        Ok(self
            .reconstructor
            .reconstruct(events, None, options.priority)?)
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .failures
            .check(state.failures.on_commit, "commit", &self.name)?;
        let staged = std::mem::take(&mut state.staged);
        debug!(recorder = %self.name, count = staged.len(), "committing staged events");
        for event in staged {
            state
                .published
                .entry(event.originator_id)
                .or_default()
                .push(event);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .failures
            .check(state.failures.on_rollback, "rollback", &self.name)?;
        let discarded = std::mem::take(&mut state.staged);
        debug!(recorder = %self.name, count = discarded.len(), "rolled back staged events");
        Ok(())
    }
}

struct SnapshotState {
    staged: Vec<Event>,
    snapshots: BoundedLog<Uuid, Box<dyn Aggregate>>,
    events: BoundedLog<Uuid, Event>,
    failures: FailureFlags,
}

/// Bounded in-memory recorder holding snapshots alongside events.
///
/// `get` picks the best snapshot under the retrieval bounds and replays only
/// the events strictly past it, in both version and timestamp. Snapshot
/// cadence is the caller's policy via [`add_snapshot`].
///
/// [`add_snapshot`]: SnapshotMemoryRecorder::add_snapshot
pub struct SnapshotMemoryRecorder {
    name: String,
    rank: u32,
    supported: HashSet<String>,
    reconstructor: Reconstructor,
    state: Mutex<SnapshotState>,
}

impl SnapshotMemoryRecorder {
    pub fn new(
        name: impl Into<String>,
        rank: u32,
        supported: impl IntoIterator<Item = impl Into<String>>,
        registry: Arc<EventRegistry>,
        snapshot_capacity: usize,
        event_capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            rank,
            supported: supported.into_iter().map(Into::into).collect(),
            reconstructor: Reconstructor::new(registry),
            state: Mutex::new(SnapshotState {
                staged: Vec::new(),
                snapshots: BoundedLog::new(snapshot_capacity),
                events: BoundedLog::new(event_capacity),
                failures: FailureFlags::default(),
            }),
        }
    }

    /// Store a deep copy of the aggregate as a snapshot, keyed by its id.
    pub async fn add_snapshot(&self, aggregate: &dyn Aggregate) {
        let mut state = self.state.lock().await;
        debug!(
            recorder = %self.name,
            id = %aggregate.id(),
            version = aggregate.version(),
            "stored snapshot"
        );
        state.snapshots.add(aggregate.id(), aggregate.clone_box());
    }

    pub async fn set_fail_on_save(&self, fail: bool) {
        self.state.lock().await.failures.on_save = fail;
    }

    pub async fn set_fail_on_rollback(&self, fail: bool) {
        self.state.lock().await.failures.on_rollback = fail;
    }

    /// Best snapshot for `id` under `options`, or `None`.
    fn best_snapshot(
        state: &SnapshotState,
        id: Uuid,
        options: &GetOptions,
    ) -> Option<Box<dyn Aggregate>> {
        state
            .snapshots
            .get(&id)?
            .iter()
            .filter(|snapshot| {
                options
                    .max_version
                    .map_or(true, |max| snapshot.version() <= max)
                    && options
                        .max_timestamp
                        .map_or(true, |max| snapshot.last_update() <= max)
            })
            .max_by(|a, b| {
                options.priority.cmp_keys(
                    (a.version(), a.last_update()),
                    (b.version(), b.last_update()),
                )
            })
            .map(|snapshot| snapshot.clone_box())
    }
}

#[async_trait]
impl Recorder for SnapshotMemoryRecorder {
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
        let mut state = self.state.lock().await;
        state.failures.check(state.failures.on_save, "save", &self.name)?;
        state.staged.extend_from_slice(events);
        Ok(())
    }

    async fn get(&self, originator_id: Uuid, options: &GetOptions) -> Result<Box<dyn Aggregate>> {
        let state = self.state.lock().await;
        if state.snapshots.get(&originator_id).is_none()
            && state.events.get(&originator_id).is_none()
        {
            return Err(RecorderError::NotFound(originator_id));
        }

        let snapshot = Self::best_snapshot(&state, originator_id, options);
        let events: Vec<Event> = state
            .events
            .get(&originator_id)
            .unwrap_or_default()
            .iter()
            .filter(|event| within_bounds(event, options))
            .filter(|event| match &snapshot {
                // Strictly past the snapshot in version and in time.
                Some(snapshot) => {
                    event.version > snapshot.version()
                        && event.timestamp > snapshot.last_update()
                }
                None => true,
            })
            .cloned()
            .collect();

        if events.is_empty() && snapshot.is_none() {
            return Err(RecorderError::NotFound(originator_id));
        }
        Ok(self
            .reconstructor
            .reconstruct(events, snapshot, options.priority)?)
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .failures
            .check(state.failures.on_commit, "commit", &self.name)?;
        let staged = std::mem::take(&mut state.staged);
        for event in staged {
            state.events.add(event.originator_id, event);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .failures
            .check(state.failures.on_rollback, "rollback", &self.name)?;
        state.staged.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::EventSourced;
    use crate::event::Priority;
    use crate::test_utils::{registry, Account};

    fn collected_account() -> (Account, Vec<Event>) {
        let mut account = Account::open("test");
        account.add(100);
        account.subtract(40);
        let events = Aggregate::collect(&mut account);
        (account, events)
    }

    #[tokio::test]
    async fn test_saved_events_invisible_until_commit() {
        let recorder = MemoryRecorder::new("mem", 0, ["Account"], registry());
        let (account, events) = collected_account();
        let id = account.meta().id();

        recorder.save(&events).await.unwrap();
        assert!(matches!(
            recorder.get(id, &GetOptions::new()).await,
            Err(RecorderError::NotFound(_))
        ));

        recorder.commit().await.unwrap();
        let replayed = recorder.get(id, &GetOptions::new()).await.unwrap();
        let replayed = replayed.as_any().downcast_ref::<Account>().unwrap();
        assert_eq!(replayed, &account);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_events() {
        let recorder = MemoryRecorder::new("mem", 0, ["Account"], registry());
        let (account, events) = collected_account();

        recorder.save(&events).await.unwrap();
        recorder.rollback().await.unwrap();
        recorder.commit().await.unwrap();

        assert!(matches!(
            recorder.get(account.meta().id(), &GetOptions::new()).await,
            Err(RecorderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_with_nothing_staged_is_noop() {
        let recorder = MemoryRecorder::new("mem", 0, ["Account"], registry());
        recorder.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_honors_max_version() {
        let recorder = MemoryRecorder::new("mem", 0, ["Account"], registry());
        let (account, events) = collected_account();
        recorder.save(&events).await.unwrap();
        recorder.commit().await.unwrap();

        let options = GetOptions::new().max_version(2);
        let replayed = recorder.get(account.meta().id(), &options).await.unwrap();
        let replayed = replayed.as_any().downcast_ref::<Account>().unwrap();
        assert_eq!(replayed.meta().version(), 2);
        assert_eq!(replayed.balance, 100);
    }

    #[tokio::test]
    async fn test_injected_save_failure() {
        let recorder = MemoryRecorder::new("mem", 0, ["Account"], registry());
        recorder.set_fail_on_save(true).await;
        let (_, events) = collected_account();
        assert!(matches!(
            recorder.save(&events).await,
            Err(RecorderError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_merge_ignores_stale_event() {
        let recorder =
            SnapshotMemoryRecorder::new("snap", 0, ["Account"], registry(), 10, 100);
        let (account, events) = collected_account();
        let id = account.meta().id();

        // Snapshot at version 2, then publish all three events; the first
        // two are at or before the snapshot and must be ignored.
        let snapshot = {
            let reconstructor = Reconstructor::new(registry());
            reconstructor
                .reconstruct(events[..2].to_vec(), None, Priority::Version)
                .unwrap()
        };
        recorder.add_snapshot(snapshot.as_ref()).await;
        recorder.save(&events).await.unwrap();
        recorder.commit().await.unwrap();

        let replayed = recorder.get(id, &GetOptions::new()).await.unwrap();
        let replayed = replayed.as_any().downcast_ref::<Account>().unwrap();
        assert_eq!(replayed.meta().version(), 3);
        assert_eq!(replayed.balance, 60);
    }

    #[tokio::test]
    async fn test_snapshot_alone_is_returned_when_no_newer_events() {
        let recorder =
            SnapshotMemoryRecorder::new("snap", 0, ["Account"], registry(), 10, 100);
        let mut account = Account::open("test");
        account.add(5);
        Aggregate::collect(&mut account);

        recorder.add_snapshot(&account).await;
        let replayed = recorder
            .get(account.meta().id(), &GetOptions::new())
            .await
            .unwrap();
        assert_eq!(
            replayed.as_any().downcast_ref::<Account>().unwrap(),
            &account
        );
    }

    #[tokio::test]
    async fn test_snapshot_bounds_select_earlier_snapshot() {
        let recorder =
            SnapshotMemoryRecorder::new("snap", 0, ["Account"], registry(), 10, 100);
        let mut account = Account::open("test");
        Aggregate::collect(&mut account);
        recorder.add_snapshot(&account).await;
        account.add(100);
        Aggregate::collect(&mut account);
        recorder.add_snapshot(&account).await;

        let options = GetOptions::new().max_version(1);
        let replayed = recorder.get(account.meta().id(), &options).await.unwrap();
        assert_eq!(replayed.version(), 1);
        assert_eq!(
            replayed.as_any().downcast_ref::<Account>().unwrap().balance,
            0
        );
    }

    #[tokio::test]
    async fn test_event_capacity_evicts_cold_originator() {
        let recorder =
            SnapshotMemoryRecorder::new("snap", 0, ["Account"], registry(), 10, 3);
        let (cold, cold_events) = collected_account();
        let (hot, hot_events) = collected_account();

        recorder.save(&cold_events).await.unwrap();
        recorder.commit().await.unwrap();
        recorder.save(&hot_events).await.unwrap();
        recorder.commit().await.unwrap();

        // Capacity 3 holds only the most recent originator's events.
        assert!(matches!(
            recorder.get(cold.meta().id(), &GetOptions::new()).await,
            Err(RecorderError::NotFound(_))
        ));
        assert!(recorder.get(hot.meta().id(), &GetOptions::new()).await.is_ok());
    }
}
