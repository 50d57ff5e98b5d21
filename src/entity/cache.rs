// src/entity/cache.rs
// Per-identity LRU cache with explicit invalidation on mutation

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::types::PersonDetail;

const CACHE_CAPACITY: usize = 256;

/// Small LRU over full person records. Person mutations must call
/// `invalidate` (or `clear` after bulk operations like merge/seed).
#[derive(Clone)]
pub struct IdentityCache {
    inner: Arc<Mutex<LruCache<i64, Arc<PersonDetail>>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            ))),
        }
    }

    pub fn get(&self, person_id: i64) -> Option<Arc<PersonDetail>> {
        self.inner.lock().get(&person_id).cloned()
    }

    pub fn put(&self, person_id: i64, detail: PersonDetail) -> Arc<PersonDetail> {
        let arc = Arc::new(detail);
        self.inner.lock().put(person_id, arc.clone());
        arc
    }

    pub fn invalidate(&self, person_id: i64) {
        self.inner.lock().pop(&person_id);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}
