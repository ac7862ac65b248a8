//! Eventum - event-sourcing core.
//!
//! Aggregates never persist current state: every state change is captured as
//! an immutable, versioned [`Event`](event::Event), and current state is a
//! deterministic fold over the event history, optionally short-circuited by
//! a snapshot. Persistence fans out across ranked
//! [`Recorder`](recorder::Recorder)s with best-effort commit/rollback.
//!
//! Typical wiring:
//! 1. build an [`EventRegistry`](registry::EventRegistry), register each
//!    aggregate type's constructor and mutators, wrap it in `Arc`;
//! 2. construct recorders (in-memory, snapshot-caching, SQLite) sharing that
//!    registry;
//! 3. wrap them in a [`RecorderStore`](store::RecorderStore) and hand it to
//!    an [`Application`](application::Application).

pub mod aggregate;
pub mod application;
pub mod cache;
pub mod codec;
pub mod config;
pub mod event;
pub mod payload;
pub mod reconstructor;
pub mod recorder;
pub mod registry;
pub mod store;

#[cfg(test)]
pub mod test_utils;

pub use aggregate::{Aggregate, AggregateMeta, EventSourced};
pub use application::Application;
pub use cache::BoundedLog;
pub use codec::{CodecError, Transcoder, TranscoderRegistry};
pub use config::Config;
pub use event::{Event, Priority};
pub use payload::{Payload, Value};
pub use reconstructor::{ReconstructionError, Reconstructor};
pub use recorder::memory::{MemoryRecorder, SnapshotMemoryRecorder};
pub use recorder::sql::SqlRecorder;
pub use recorder::{GetOptions, Recorder, RecorderError};
pub use registry::{EventRegistry, MutatorError, ProtocolError};
pub use store::{RecorderStore, SavingError, StoreError};
