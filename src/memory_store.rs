use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::resource::{Request, RequestStatus, ResourceId};
use crate::store::{StateStore, StoreError};

/// In-memory StateStore for tests and manifest mode.
///
/// Backend faults can be injected per operation to exercise the retry
/// paths of the reconciler.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<ResourceId, Request>>,
    fetch_failures: AtomicU32,
    persist_failures: AtomicU32,
    persists: AtomicU32,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a resource.
    pub fn insert(&self, request: Request) {
        let mut data = self.data.lock().unwrap();
        data.insert(request.id(), request);
    }

    pub fn get(&self, id: &ResourceId) -> Option<Request> {
        self.data.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &ResourceId) -> Option<Request> {
        self.data.lock().unwrap().remove(id)
    }

    /// All resources, ordered by id.
    pub fn list(&self) -> Vec<Request> {
        self.data.lock().unwrap().values().cloned().collect()
    }

    /// Make the next `n` fetches fail with a backend error.
    pub fn fail_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` status writes fail with a backend error.
    pub fn fail_persists(&self, n: u32) {
        self.persist_failures.store(n, Ordering::SeqCst);
    }

    /// Number of status writes that reached the data.
    pub fn persist_count(&self) -> u32 {
        self.persists.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn fetch(&self, id: &ResourceId) -> Result<Request, StoreError> {
        if take_failure(&self.fetch_failures) {
            return Err(StoreError::Backend("injected fetch failure".to_string()));
        }
        let data = self.data.lock().unwrap();
        data.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn persist_status(
        &self,
        id: &ResourceId,
        status: &RequestStatus,
    ) -> Result<(), StoreError> {
        if take_failure(&self.persist_failures) {
            return Err(StoreError::Backend("injected persist failure".to_string()));
        }
        let mut data = self.data.lock().unwrap();
        let request = data
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if request.status.is_completed() {
            return Err(StoreError::Conflict(id.clone()));
        }
        request.status = status.clone();
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
