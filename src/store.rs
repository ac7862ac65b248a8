//! Recorder coordination: fan-out save, ranked fallback get.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::recorder::{GetOptions, Recorder, RecorderError};

/// One or more recorders failed to persist a save batch.
///
/// Raised after rollback has been attempted on every selected recorder; the
/// original failure is always the cause, never a rollback failure.
#[derive(Debug, thiserror::Error)]
#[error("save failed on recorder {recorder:?}: {source}")]
pub struct SavingError {
    pub recorder: String,
    #[source]
    pub source: RecorderError,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Saving(#[from] SavingError),

    #[error("aggregate {0} not found in any recorder")]
    NotFound(Uuid),

    #[error("no recorder named {0:?}")]
    UnknownRecorder(String),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Coordinates a fixed set of recorders.
///
/// Saves fan out to every recorder supporting the aggregate's type, in
/// ascending rank order, with best-effort commit/rollback across the set.
/// Gets fall back across recorders in the same order.
pub struct RecorderStore {
    // Ascending rank, fixed at construction.
    recorders: Vec<Arc<dyn Recorder>>,
}

impl RecorderStore {
    pub fn new(mut recorders: Vec<Arc<dyn Recorder>>) -> Self {
        recorders.sort_by_key(|recorder| recorder.rank());
        info!(count = recorders.len(), "recorder store wired");
        Self { recorders }
    }

    pub fn recorders(&self) -> &[Arc<dyn Recorder>] {
        &self.recorders
    }

    /// Drain the aggregate's unsaved events and persist them on every
    /// recorder responsible for its type.
    ///
    /// On any save failure, every selected recorder gets a rollback and the
    /// original failure is reported; rollback failures are logged and
    /// swallowed. Once all saves succeed each recorder is committed in rank
    /// order; a failing commit is reported the same way, but recorders
    /// already committed stay committed.
    pub async fn save(&self, aggregate: &mut dyn Aggregate) -> Result<()> {
        let events = aggregate.collect();
        if events.is_empty() {
            debug!(id = %aggregate.id(), "nothing to save");
            return Ok(());
        }

        let selected: Vec<&Arc<dyn Recorder>> = self
            .recorders
            .iter()
            .filter(|recorder| recorder.supports(aggregate.aggregate_type()))
            .collect();
        debug!(
            id = %aggregate.id(),
            count = events.len(),
            recorders = selected.len(),
            "saving events"
        );

        for recorder in &selected {
            if let Err(cause) = recorder.save(&events).await {
                self.rollback_all(&selected).await;
                return Err(SavingError {
                    recorder: recorder.name().to_owned(),
                    source: cause,
                }
                .into());
            }
        }

        for (position, recorder) in selected.iter().enumerate() {
            if let Err(cause) = recorder.commit().await {
                // Earlier commits are final; roll back what is still staged.
                self.rollback_all(&selected[position..]).await;
                return Err(SavingError {
                    recorder: recorder.name().to_owned(),
                    source: cause,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn rollback_all(&self, recorders: &[&Arc<dyn Recorder>]) {
        for recorder in recorders {
            if let Err(e) = recorder.rollback().await {
                warn!(recorder = %recorder.name(), error = %e, "rollback failed");
            }
        }
    }

    /// Retrieve an aggregate by id.
    ///
    /// With a `recorder_name`, delegates to that recorder and propagates its
    /// errors. Otherwise recorders are tried in ascending rank order; a
    /// not-found answer moves on to the next, any other error propagates.
    pub async fn get(
        &self,
        originator_id: Uuid,
        recorder_name: Option<&str>,
        options: &GetOptions,
    ) -> Result<Box<dyn Aggregate>> {
        if let Some(name) = recorder_name {
            let recorder = self
                .recorders
                .iter()
                .find(|recorder| recorder.name() == name)
                .ok_or_else(|| StoreError::UnknownRecorder(name.to_owned()))?;
            return Ok(recorder.get(originator_id, options).await?);
        }

        for recorder in &self.recorders {
            match recorder.get(originator_id, options).await {
                Ok(aggregate) => return Ok(aggregate),
                Err(RecorderError::NotFound(_)) | Err(RecorderError::NoEvents(_)) => {
                    debug!(recorder = %recorder.name(), id = %originator_id, "not found, trying next");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::NotFound(originator_id))
    }
}
