//! Event registry: (aggregate type, event name) to mutation function.
//!
//! The registry is populated once during wiring and wrapped in an `Arc`
//! before any replay happens; steady-state use is read-only. Registration is
//! explicit and typed, so "is this an aggregate" is settled at compile time
//! and replay only has to dispatch on the event's type tag and name.

use std::any::Any;
use std::collections::HashMap;

use crate::aggregate::{Aggregate, EventSourced};
use crate::event::Event;
use crate::payload::Payload;

/// Failure raised by a registered constructor or mutator.
#[derive(Debug, thiserror::Error)]
pub enum MutatorError {
    #[error("missing payload entry {0:?}")]
    MissingField(String),

    #[error("{0}")]
    Invalid(String),
}

/// Failures of the replay dispatch protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("aggregate type {0:?} is not registered")]
    UnknownAggregateType(String),

    #[error("no mutator registered for {aggregate_type}/{name}")]
    UnknownEvent { aggregate_type: String, name: String },

    #[error("event {name:?} is not the construction event for {aggregate_type}")]
    NotConstruction { aggregate_type: String, name: String },

    #[error("aggregate instance is not a {0}")]
    TypeMismatch(&'static str),

    #[error(transparent)]
    Mutator(#[from] MutatorError),
}

type ErasedConstructor =
    Box<dyn Fn(&Event) -> Result<Box<dyn Aggregate>, ProtocolError> + Send + Sync>;
type ErasedMutator = Box<dyn Fn(&mut dyn Any, &Event) -> Result<(), ProtocolError> + Send + Sync>;

struct TypeEntry {
    construction_event: String,
    constructor: ErasedConstructor,
    mutators: HashMap<String, ErasedMutator>,
}

/// Process-wide mapping from (aggregate type, event name) to the function
/// that applies that event during replay.
///
/// Mutable while wiring; callers wrap it in `Arc` afterwards, which ends the
/// registration phase.
#[derive(Default)]
pub struct EventRegistry {
    types: HashMap<String, TypeEntry>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the construction event for `A`.
    ///
    /// The function builds the aggregate from the event payload alone and
    /// must not record any event; the registry assigns the event's
    /// originator id, version, and timestamp afterwards.
    pub fn constructor<A, F>(&mut self, event_name: &str, construct: F)
    where
        A: EventSourced,
        F: Fn(&Payload) -> Result<A, MutatorError> + Send + Sync + 'static,
    {
        let erased: ErasedConstructor = Box::new(move |event: &Event| {
            let mut aggregate = construct(&event.payload)?;
            let meta = aggregate.meta_mut();
            meta.set_id(event.originator_id);
            meta.set_version(event.version);
            meta.set_last_update(event.timestamp);
            Ok(Box::new(aggregate))
        });
        let entry = self.types.entry(A::AGGREGATE_TYPE.to_owned()).or_insert_with(|| TypeEntry {
            construction_event: event_name.to_owned(),
            constructor: erased_noop::<A>(),
            mutators: HashMap::new(),
        });
        entry.construction_event = event_name.to_owned();
        entry.constructor = erased;
    }

    /// Register the mutator applied when replaying `event_name` onto an
    /// existing `A`. After the mutator runs, the aggregate's version and
    /// last-update timestamp are assigned from the event.
    pub fn mutator<A, F>(&mut self, event_name: &str, mutate: F)
    where
        A: EventSourced,
        F: Fn(&mut A, &Payload) -> Result<(), MutatorError> + Send + Sync + 'static,
    {
        let erased: ErasedMutator = Box::new(move |any: &mut dyn Any, event: &Event| {
            let aggregate = any
                .downcast_mut::<A>()
                .ok_or(ProtocolError::TypeMismatch(A::AGGREGATE_TYPE))?;
            mutate(aggregate, &event.payload)?;
            let meta = aggregate.meta_mut();
            meta.set_version(event.version);
            meta.set_last_update(event.timestamp);
            Ok(())
        });
        let entry = self.types.entry(A::AGGREGATE_TYPE.to_owned()).or_insert_with(|| TypeEntry {
            construction_event: String::new(),
            constructor: erased_noop::<A>(),
            mutators: HashMap::new(),
        });
        entry.mutators.insert(event_name.to_owned(), erased);
    }

    pub fn is_registered(&self, aggregate_type: &str) -> bool {
        self.types.contains_key(aggregate_type)
    }

    /// Construct a fresh aggregate from a construction event. Never emits.
    pub fn construct(&self, event: &Event) -> Result<Box<dyn Aggregate>, ProtocolError> {
        let entry = self
            .types
            .get(&event.aggregate_type)
            .ok_or_else(|| ProtocolError::UnknownAggregateType(event.aggregate_type.clone()))?;
        if entry.construction_event != event.name {
            return Err(ProtocolError::NotConstruction {
                aggregate_type: event.aggregate_type.clone(),
                name: event.name.clone(),
            });
        }
        (entry.constructor)(event)
    }

    /// Apply one replayed event to an existing aggregate.
    pub fn apply(
        &self,
        aggregate: &mut dyn Aggregate,
        event: &Event,
    ) -> Result<(), ProtocolError> {
        let entry = self
            .types
            .get(&event.aggregate_type)
            .ok_or_else(|| ProtocolError::UnknownAggregateType(event.aggregate_type.clone()))?;
        let mutator = entry
            .mutators
            .get(&event.name)
            .ok_or_else(|| ProtocolError::UnknownEvent {
                aggregate_type: event.aggregate_type.clone(),
                name: event.name.clone(),
            })?;
        mutator(aggregate.as_any_mut(), event)
    }

    /// One replay step: construct on `None`, mutate on `Some`.
    pub fn mutate(
        &self,
        aggregate: Option<Box<dyn Aggregate>>,
        event: &Event,
    ) -> Result<Box<dyn Aggregate>, ProtocolError> {
        match aggregate {
            None => self.construct(event),
            Some(mut aggregate) => {
                self.apply(aggregate.as_mut(), event)?;
                Ok(aggregate)
            }
        }
    }
}

// Placeholder until the real constructor lands; registering mutators before
// the constructor is legal during wiring.
fn erased_noop<A: EventSourced>() -> ErasedConstructor {
    Box::new(|event: &Event| {
        Err(ProtocolError::NotConstruction {
            aggregate_type: event.aggregate_type.clone(),
            name: event.name.clone(),
        })
    })
}
