pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod memory_store;
pub mod mock_executor;
pub mod reconciler;
pub mod resource;
pub mod store;

pub use config::ReconcilerConfig;
pub use controller::{Controller, ControllerError, ControllerReport};
pub use error::{ReconcileError, Stage};
pub use executor::{ActionExecutor, ActionResult, ExecutorError, HttpExecutor};
pub use memory_store::MemoryStore;
pub use mock_executor::MockExecutor;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use resource::{Request, RequestSpec, RequestStatus, ResourceId};
pub use store::{StateStore, StoreError};
