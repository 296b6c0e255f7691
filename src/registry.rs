use crate::sample::EntityId;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Equipment ids the scheduler generates telemetry for.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    inner: Arc<Mutex<BTreeSet<EntityId>>>,
}

impl EntityRegistry {
    pub fn new<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = EntityId>,
    {
        Self {
            inner: Arc::new(Mutex::new(ids.into_iter().collect())),
        }
    }

    fn guard(&self) -> MutexGuard<'_, BTreeSet<EntityId>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ids in ascending order.
    pub fn snapshot(&self) -> Vec<EntityId> {
        self.guard().iter().copied().collect()
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.guard().contains(&entity_id)
    }

    pub fn remove(&self, entity_id: EntityId) -> bool {
        self.guard().remove(&entity_id)
    }
}
