use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::executor::{ActionExecutor, ActionResult, ExecutorError};
use crate::resource::RequestSpec;

/// Mock executor for testing. Returns queued outcomes in order, then a
/// default `200 ok`. Records every spec it was asked to execute.
pub struct MockExecutor {
    outcomes: Mutex<VecDeque<Result<ActionResult, ExecutorError>>>,
    default_result: ActionResult,
    executed: Mutex<Vec<RequestSpec>>,
    delay: Option<Duration>,
}

impl MockExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            default_result: ActionResult {
                code: "200".to_string(),
                body: "ok".to_string(),
            },
            executed: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep this long inside every call, to hold passes open.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn push_outcome(&self, outcome: Result<ActionResult, ExecutorError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn call_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn executed(&self) -> Vec<RequestSpec> {
        self.executed.lock().unwrap().clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&self, spec: &RequestSpec) -> Result<ActionResult, ExecutorError> {
        self.executed.lock().unwrap().push(spec.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.default_result.clone()))
    }
}
