use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Stage};
use crate::executor::ActionExecutor;
use crate::resource::{RequestStatus, ResourceId};
use crate::store::{StateStore, StoreError};

/// How a successful pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resource does not exist (or vanished mid-pass). Nothing to do.
    NotFound,
    /// Status already carried a code; no call was made.
    AlreadyCompleted,
    /// The call was made and its result recorded.
    Executed(RequestStatus),
}

/// Runs read-decide-act-write passes for request resources.
///
/// Holds no per-resource state between passes. Whether a resource still
/// needs its call is decided from freshly fetched status every time, so
/// redundant or overlapping deliveries are safe for the write; see
/// [`ReconcileError::Persist`] for the at-least-once gap on the call.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    executor: Arc<dyn ActionExecutor>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StateStore>,
        executor: Arc<dyn ActionExecutor>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// One reconciliation pass: one fetch, at most one call, at most one
    /// status write.
    pub async fn reconcile(&self, id: &ResourceId) -> Result<ReconcileOutcome, ReconcileError> {
        let span = info_span!("reconcile", resource = %id);
        self.pass(id).instrument(span).await
    }

    async fn pass(&self, id: &ResourceId) -> Result<ReconcileOutcome, ReconcileError> {
        info!("reconcile");

        let fetched = bounded(id, Stage::Fetch, self.config.store_timeout, self.store.fetch(id))
            .await?;
        let request = match fetched {
            Ok(request) => request,
            Err(StoreError::NotFound(_)) => {
                info!("resource not found, nothing to do");
                return Ok(ReconcileOutcome::NotFound);
            }
            Err(source) => {
                error!(error = %source, "unable to fetch resource");
                return Err(ReconcileError::Store {
                    id: id.clone(),
                    source,
                });
            }
        };

        if request.status.is_completed() {
            info!(code = %request.status.code, "request already made");
            return Ok(ReconcileOutcome::AlreadyCompleted);
        }

        let executed = bounded(
            id,
            Stage::Action,
            self.config.action_timeout,
            self.executor.execute(&request.spec),
        )
        .await?;
        let result = executed.map_err(|source| {
            error!(error = %source, "request failed");
            ReconcileError::Action {
                id: id.clone(),
                source,
            }
        })?;

        let status = RequestStatus {
            code: result.code.clone(),
            body: result.body.clone(),
        };

        let persisted = bounded(
            id,
            Stage::Persist,
            self.config.store_timeout,
            self.store.persist_status(id, &status),
        )
        .await
        .map_err(|e| {
            error!(code = %result.code, "status write timed out after request was made");
            e
        })?;
        match persisted {
            Ok(()) => {
                info!(code = %status.code, "request status recorded");
                Ok(ReconcileOutcome::Executed(status))
            }
            Err(StoreError::NotFound(_)) => {
                warn!(code = %status.code, "resource deleted before status could be recorded");
                Ok(ReconcileOutcome::NotFound)
            }
            Err(StoreError::Conflict(_)) => {
                warn!(
                    code = %status.code,
                    "status recorded by an overlapping pass; request was repeated"
                );
                Ok(ReconcileOutcome::AlreadyCompleted)
            }
            Err(source) => {
                error!(
                    error = %source,
                    code = %result.code,
                    "unable to update request status; request will be repeated on retry"
                );
                Err(ReconcileError::Persist {
                    id: id.clone(),
                    result,
                    source,
                })
            }
        }
    }
}

async fn bounded<T>(
    id: &ResourceId,
    stage: Stage,
    limit: Duration,
    fut: impl Future<Output = T>,
) -> Result<T, ReconcileError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        warn!(%stage, ?limit, "step exceeded deadline");
        ReconcileError::Timeout {
            id: id.clone(),
            stage,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ActionResult, ExecutorError};
    use crate::memory_store::MemoryStore;
    use crate::mock_executor::MockExecutor;
    use crate::resource::{Request, RequestSpec};

    fn setup() -> (Arc<MemoryStore>, Arc<MockExecutor>, Reconciler) {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockExecutor::new());
        let reconciler = Reconciler::new(store.clone(), mock.clone(), ReconcilerConfig::default());
        (store, mock, reconciler)
    }

    fn pending(store: &MemoryStore, name: &str) -> ResourceId {
        let id = ResourceId::new("default", name);
        store.insert(Request::new(
            &id,
            RequestSpec {
                path: "http://svc/ping".to_string(),
                method: "get".to_string(),
                ..RequestSpec::default()
            },
        ));
        id
    }

    #[tokio::test]
    async fn pending_resource_executes_once_and_records() {
        let (store, mock, reconciler) = setup();
        let id = pending(&store, "ping");

        let outcome = reconciler.reconcile(&id).await.unwrap();
        let expected = RequestStatus {
            code: "200".to_string(),
            body: "ok".to_string(),
        };
        assert_eq!(outcome, ReconcileOutcome::Executed(expected.clone()));
        assert_eq!(store.get(&id).unwrap().status, expected);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.executed()[0].method, "get");
    }

    #[tokio::test]
    async fn completed_resource_is_a_no_op() {
        let (store, mock, reconciler) = setup();
        let id = pending(&store, "done");
        let mut req = store.get(&id).unwrap();
        req.status = RequestStatus {
            code: "500".to_string(),
            body: "earlier".to_string(),
        };
        store.insert(req.clone());

        let outcome = reconciler.reconcile(&id).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyCompleted);
        assert_eq!(mock.call_count(), 0);
        assert_eq!(store.get(&id).unwrap(), req);
        assert_eq!(store.persist_count(), 0);
    }

    #[tokio::test]
    async fn repeated_passes_call_once() {
        let (store, mock, reconciler) = setup();
        let id = pending(&store, "ping");

        for _ in 0..3 {
            reconciler.reconcile(&id).await.unwrap();
        }
        assert_eq!(mock.call_count(), 1);
        assert_eq!(store.persist_count(), 1);
    }

    #[tokio::test]
    async fn missing_resource_is_benign() {
        let (_store, mock, reconciler) = setup();
        let outcome = reconciler
            .reconcile(&ResourceId::new("default", "ghost"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotFound);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_retryable_and_skips_action() {
        let (store, mock, reconciler) = setup();
        let id = pending(&store, "ping");
        store.fail_fetches(1);

        let err = reconciler.reconcile(&id).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store { .. }));
        assert!(err.is_retryable());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn action_failure_leaves_status_empty() {
        let (store, mock, reconciler) = setup();
        let id = pending(&store, "ping");
        mock.push_outcome(Err(ExecutorError::Transport("connection refused".to_string())));

        let err = reconciler.reconcile(&id).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.get(&id).unwrap().status.is_completed());

        // Redelivery tries again and succeeds.
        reconciler.reconcile(&id).await.unwrap();
        assert_eq!(mock.call_count(), 2);
        assert!(store.get(&id).unwrap().status.is_completed());
    }

    #[tokio::test]
    async fn malformed_request_is_terminal() {
        let (store, mock, reconciler) = setup();
        let id = pending(&store, "bad");
        mock.push_outcome(Err(ExecutorError::MalformedHeader {
            entry: "nope".to_string(),
            reason: "missing ':' separator".to_string(),
        }));

        let err = reconciler.reconcile(&id).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Action { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn persist_failure_reports_result_and_retry_repeats_call() {
        let (store, mock, reconciler) = setup();
        let id = pending(&store, "ping");
        store.fail_persists(1);

        let err = reconciler.reconcile(&id).await.unwrap_err();
        match &err {
            ReconcileError::Persist { result, .. } => assert_eq!(result.code, "200"),
            other => panic!("expected Persist error, got: {other}"),
        }
        assert!(err.is_retryable());

        reconciler.reconcile(&id).await.unwrap();
        assert_eq!(mock.call_count(), 2);
        assert_eq!(store.persist_count(), 1);
    }

    #[tokio::test]
    async fn deleted_before_persist_ends_as_not_found() {
        struct DeletingExecutor(Arc<MemoryStore>, ResourceId);

        #[async_trait::async_trait]
        impl ActionExecutor for DeletingExecutor {
            async fn execute(&self, _spec: &RequestSpec) -> Result<ActionResult, ExecutorError> {
                self.0.remove(&self.1);
                Ok(ActionResult {
                    code: "202".to_string(),
                    body: String::new(),
                })
            }
        }

        let store = Arc::new(MemoryStore::new());
        let id = pending(&store, "short-lived");
        let executor = Arc::new(DeletingExecutor(store.clone(), id.clone()));
        let reconciler = Reconciler::new(store.clone(), executor, ReconcilerConfig::default());

        let outcome = reconciler.reconcile(&id).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotFound);
    }

    #[tokio::test]
    async fn overlapping_passes_record_a_single_result() {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(50)));
        mock.push_outcome(Ok(ActionResult {
            code: "201".to_string(),
            body: "first".to_string(),
        }));
        mock.push_outcome(Ok(ActionResult {
            code: "500".to_string(),
            body: "second".to_string(),
        }));
        let reconciler = Reconciler::new(store.clone(), mock.clone(), ReconcilerConfig::default());
        let id = pending(&store, "raced");

        let (a, b) = tokio::join!(reconciler.reconcile(&id), reconciler.reconcile(&id));
        let outcomes = [a.unwrap(), b.unwrap()];

        let recorded: Vec<&RequestStatus> = outcomes
            .iter()
            .filter_map(|o| match o {
                ReconcileOutcome::Executed(status) => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(recorded.len(), 1, "outcomes: {outcomes:?}");
        assert!(outcomes.contains(&ReconcileOutcome::AlreadyCompleted));
        assert_eq!(&store.get(&id).unwrap().status, recorded[0]);
        assert_eq!(store.persist_count(), 1);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn slow_action_times_out() {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockExecutor::new().with_delay(Duration::from_secs(5)));
        let config = ReconcilerConfig {
            action_timeout: Duration::from_millis(50),
            ..ReconcilerConfig::default()
        };
        let reconciler = Reconciler::new(store.clone(), mock, config);
        let id = pending(&store, "slow");

        let err = reconciler.reconcile(&id).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Timeout {
                stage: Stage::Action,
                ..
            }
        ));
        assert!(!store.get(&id).unwrap().status.is_completed());
    }
}
