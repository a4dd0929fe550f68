use crate::model::{NodeId, Unit};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Bounded id -> Unit snapshot map shared across pipelines. Entries may be
/// stale; callers fall back to the primary store on a miss.
#[derive(Debug)]
pub struct RecencyCache {
    entries: Mutex<LruCache<NodeId, Arc<Unit>>>,
}

impl RecencyCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<Unit>> {
        self.entries.lock().get(id).cloned()
    }

    pub fn put(&self, unit: Unit) -> Arc<Unit> {
        let unit = Arc::new(unit);
        self.entries.lock().put(unit.id.clone(), Arc::clone(&unit));
        unit
    }

    pub fn evict(&self, id: &NodeId) -> bool {
        self.entries.lock().pop(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
