//! Replaying ordered events into aggregate state.

use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::event::{Event, Priority};
use crate::registry::{EventRegistry, ProtocolError};

/// Failures while folding events into an aggregate.
#[derive(Debug, thiserror::Error)]
pub enum ReconstructionError {
    #[error("no events and no starting aggregate")]
    NoEvents,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Folds an ordered event sequence onto an aggregate, constructing one from
/// the first event when no starting point is given.
///
/// Reconstruction is all-or-nothing: any lookup or mutator failure aborts
/// and no partial aggregate is returned.
#[derive(Clone)]
pub struct Reconstructor {
    registry: Arc<EventRegistry>,
}

impl Reconstructor {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Sort `events` by `priority` and fold them onto `aggregate`.
    ///
    /// With no events, the starting aggregate is returned as-is; with
    /// neither events nor a starting aggregate this is [`NoEvents`].
    ///
    /// [`NoEvents`]: ReconstructionError::NoEvents
    pub fn reconstruct(
        &self,
        mut events: Vec<Event>,
        aggregate: Option<Box<dyn Aggregate>>,
        priority: Priority,
    ) -> Result<Box<dyn Aggregate>, ReconstructionError> {
        priority.sort(&mut events);
        let mut aggregate = aggregate;
        for event in &events {
            aggregate = Some(self.registry.mutate(aggregate, event)?);
        }
        aggregate.ok_or(ReconstructionError::NoEvents)
    }
}
