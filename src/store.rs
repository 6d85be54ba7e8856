use async_trait::async_trait;

use crate::resource::{Request, RequestStatus, ResourceId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource {0} not found")]
    NotFound(ResourceId),

    /// The write lost a race: the stored status was already populated.
    #[error("status of {0} was already recorded")]
    Conflict(ResourceId),

    #[error("store backend: {0}")]
    Backend(String),
}

/// Get/update contract the reconciler consumes from the object store.
///
/// `fetch` and `persist_status` are independent round-trips; no
/// connection or transaction is held between them. The store makes each
/// write atomic.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn fetch(&self, id: &ResourceId) -> Result<Request, StoreError>;

    /// Record the status of an existing resource. The write only lands
    /// while the stored status is still empty; otherwise it returns
    /// `Conflict` and leaves the stored status untouched. Returns
    /// `NotFound` if the resource was deleted since it was fetched.
    async fn persist_status(
        &self,
        id: &ResourceId,
        status: &RequestStatus,
    ) -> Result<(), StoreError>;
}
