//! Application façade.

use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::recorder::GetOptions;
use crate::store::{RecorderStore, Result};

/// Thin façade over a [`RecorderStore`], decoupling callers from how the
/// store was wired. No logic of its own.
pub struct Application {
    store: RecorderStore,
}

impl Application {
    pub fn new(store: RecorderStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecorderStore {
        &self.store
    }

    /// Persist the aggregate's unsaved events.
    pub async fn save(&self, aggregate: &mut dyn Aggregate) -> Result<()> {
        self.store.save(aggregate).await
    }

    /// Retrieve an aggregate, either from a named recorder or by ranked
    /// fallback.
    pub async fn get(
        &self,
        originator_id: Uuid,
        recorder_name: Option<&str>,
        options: &GetOptions,
    ) -> Result<Box<dyn Aggregate>> {
        self.store.get(originator_id, recorder_name, options).await
    }
}
