use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ReconcileError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::resource::ResourceId;

/// Error from the controller loop itself (not from a pass).
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("reconcile task join error: {0}")]
    Join(String),
}

/// Tally of the passes a controller run performed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerReport {
    pub executed: usize,
    pub already_completed: usize,
    pub not_found: usize,
    pub requeued: usize,
    /// Resources given up on: terminal errors and exhausted retries.
    pub failed: Vec<(ResourceId, String)>,
}

impl ControllerReport {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Executed(_) => self.executed += 1,
            ReconcileOutcome::AlreadyCompleted => self.already_completed += 1,
            ReconcileOutcome::NotFound => self.not_found += 1,
        }
    }
}

enum Event {
    Finished {
        id: ResourceId,
        result: Result<ReconcileOutcome, ReconcileError>,
    },
    Requeue {
        id: ResourceId,
    },
}

/// Delivery bookkeeping. Passes for one identity never overlap: a
/// delivery that arrives mid-pass marks the identity dirty and it runs
/// once more afterwards.
#[derive(Default)]
struct WorkQueue {
    ready: VecDeque<ResourceId>,
    queued: HashSet<ResourceId>,
    in_flight: HashSet<ResourceId>,
    dirty: HashSet<ResourceId>,
    attempts: HashMap<ResourceId, u32>,
}

impl WorkQueue {
    fn enqueue(&mut self, id: ResourceId) {
        if self.in_flight.contains(&id) {
            debug!(resource = %id, "pass in flight, deferring delivery");
            self.dirty.insert(id);
        } else if self.queued.insert(id.clone()) {
            self.ready.push_back(id);
        }
    }

    fn next(&mut self) -> Option<ResourceId> {
        let id = self.ready.pop_front()?;
        self.queued.remove(&id);
        self.in_flight.insert(id.clone());
        Some(id)
    }

    /// Mark a pass finished; returns true if it was redelivered meanwhile.
    fn finish(&mut self, id: &ResourceId) -> bool {
        self.in_flight.remove(id);
        self.dirty.remove(id)
    }
}

/// Local trigger source: turns delivered identities into reconciliation
/// passes. Distinct resources reconcile concurrently up to the configured
/// limit; retryable failures are redelivered with exponential backoff.
pub struct Controller {
    reconciler: Arc<Reconciler>,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Reconcile a fixed set of identities to quiescence.
    pub async fn reconcile_all(
        &self,
        ids: impl IntoIterator<Item = ResourceId>,
    ) -> Result<ControllerReport, ControllerError> {
        let ids: Vec<ResourceId> = ids.into_iter().collect();
        let (tx, rx) = mpsc::channel(ids.len().max(1));
        for id in ids {
            // Capacity covers every id and rx is alive, so this cannot fail.
            let _ = tx.try_send(id);
        }
        drop(tx);
        self.run(rx).await
    }

    /// Process deliveries until the channel closes and all outstanding
    /// passes and redeliveries have drained.
    pub async fn run(
        &self,
        mut triggers: mpsc::Receiver<ResourceId>,
    ) -> Result<ControllerReport, ControllerError> {
        let config = self.reconciler.config().clone();
        let concurrency = config.concurrency.max(1);
        let mut queue = WorkQueue::default();
        let mut report = ControllerReport::default();
        let mut join_set: JoinSet<Event> = JoinSet::new();
        let mut running = 0usize;
        let mut open = true;

        loop {
            while running < concurrency {
                let Some(id) = queue.next() else { break };
                running += 1;
                let reconciler = self.reconciler.clone();
                join_set.spawn(async move {
                    let result = reconciler.reconcile(&id).await;
                    Event::Finished { id, result }
                });
            }

            if !open && join_set.is_empty() {
                break;
            }

            tokio::select! {
                delivery = triggers.recv(), if open => match delivery {
                    Some(id) => queue.enqueue(id),
                    None => {
                        debug!("trigger channel closed, draining");
                        open = false;
                    }
                },
                Some(joined) = join_set.join_next() => {
                    let event = joined.map_err(|e| ControllerError::Join(e.to_string()))?;
                    match event {
                        Event::Requeue { id } => queue.enqueue(id),
                        Event::Finished { id, result } => {
                            running -= 1;
                            let redelivered = queue.finish(&id);
                            match result {
                                Ok(outcome) => {
                                    queue.attempts.remove(&id);
                                    report.record(&outcome);
                                }
                                Err(e) if e.is_retryable() => {
                                    let attempt = {
                                        let count = queue.attempts.entry(id.clone()).or_insert(0);
                                        *count += 1;
                                        *count
                                    };
                                    if attempt > config.max_requeues {
                                        error!(resource = %id, error = %e, attempt, "giving up after retries");
                                        queue.attempts.remove(&id);
                                        report.failed.push((id.clone(), e.to_string()));
                                    } else if redelivered {
                                        warn!(resource = %id, error = %e, "reconcile failed, redelivered during pass");
                                        report.requeued += 1;
                                    } else {
                                        let delay = config.backoff_for(attempt);
                                        warn!(resource = %id, error = %e, ?delay, "reconcile failed, requeueing");
                                        report.requeued += 1;
                                        let requeue_id = id.clone();
                                        join_set.spawn(async move {
                                            tokio::time::sleep(delay).await;
                                            Event::Requeue { id: requeue_id }
                                        });
                                    }
                                }
                                Err(e) => {
                                    error!(resource = %id, error = %e, "reconcile failed permanently");
                                    queue.attempts.remove(&id);
                                    report.failed.push((id.clone(), e.to_string()));
                                }
                            }
                            if redelivered {
                                queue.enqueue(id);
                            }
                        }
                    }
                },
                else => break,
            }
        }

        info!(
            executed = report.executed,
            already_completed = report.already_completed,
            not_found = report.not_found,
            requeued = report.requeued,
            failed = report.failed.len(),
            "controller drained"
        );
        Ok(report)
    }
}
