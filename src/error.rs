use crate::executor::{ActionResult, ExecutorError};
use crate::resource::ResourceId;
use crate::store::StoreError;

/// Step of a reconciliation pass that can block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Action,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Action => "action",
            Self::Persist => "persist",
        })
    }
}

/// Errors produced by a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("fetch {id}: {source}")]
    Store {
        id: ResourceId,
        #[source]
        source: StoreError,
    },

    #[error("action for {id}: {source}")]
    Action {
        id: ResourceId,
        #[source]
        source: ExecutorError,
    },

    /// The call happened but its result was not recorded. The next pass
    /// will see the resource as pending and call again.
    #[error("persist status for {id} (code {}): {source}", .result.code)]
    Persist {
        id: ResourceId,
        result: ActionResult,
        #[source]
        source: StoreError,
    },

    #[error("{stage} for {id} exceeded deadline")]
    Timeout { id: ResourceId, stage: Stage },
}

impl ReconcileError {
    /// Whether redelivering the same identity can succeed. A malformed
    /// desired request fails identically until it is corrected upstream.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Action { source, .. } => !source.is_malformed_input(),
            Self::Store { .. } | Self::Persist { .. } | Self::Timeout { .. } => true,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::Store { id, .. }
            | Self::Action { id, .. }
            | Self::Persist { id, .. }
            | Self::Timeout { id, .. } => id,
        }
    }
}
