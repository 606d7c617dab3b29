/// Quota-aware batch execution of fetch tasks
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::types::FetchTask;

/// Lifecycle of one task within a run. A task never re-enters Pending;
/// retries happen inside the operation the task is dispatched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
}

/// Cooperative run-level cancellation: stops dispatch of further batches and
/// lets in-flight calls finish or fail naturally.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Terminal record of one dispatched task
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub task: FetchTask,
    pub result: Result<T>,
}

impl<T> TaskOutcome<T> {
    pub fn state(&self) -> TaskState {
        match self.result {
            Ok(_) => TaskState::Succeeded,
            Err(_) => TaskState::Failed,
        }
    }
}

/// Result of one batcher run
#[derive(Debug)]
pub struct BatchRun<T> {
    /// One outcome per dispatched task, in planning order
    pub outcomes: Vec<TaskOutcome<T>>,
    /// Tasks never dispatched because the run was cancelled first
    pub skipped: Vec<FetchTask>,
    pub batches_dispatched: usize,
    pub cancelled: bool,
}

impl<T> BatchRun<T> {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Executes fetch tasks in quota-sized batches.
///
/// Each batch is dispatched concurrently behind a semaphore capping in-flight
/// calls; between batches the batcher sleeps out the quota window cooldown so
/// the provider's absolute requests-per-period ceiling is never exceeded. The
/// concurrency gate and the request quota are distinct limits: the first
/// protects the provider's connection handling, the second its accounting.
pub struct QuotaBatcher {
    quota_per_window: usize,
    window_cooldown: Duration,
    max_concurrency: usize,
    completed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl QuotaBatcher {
    pub fn new(quota_per_window: usize, window_cooldown: Duration, max_concurrency: usize) -> Self {
        QuotaBatcher {
            quota_per_window: quota_per_window.max(1),
            window_cooldown,
            max_concurrency: max_concurrency.max(1),
            completed: Arc::new(AtomicUsize::new(0)),
            total: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Completed/total task counts for the run in flight. Completed only ever
    /// increases within a run.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    /// Run every task to a terminal state.
    ///
    /// A single task's failure never aborts its batch or the run; failures
    /// surface in the per-task outcomes so sibling instruments keep syncing.
    pub async fn run<T, F, Fut>(
        &self,
        tasks: Vec<FetchTask>,
        op: F,
        cancel: &CancelFlag,
    ) -> BatchRun<T>
    where
        T: Send + 'static,
        F: Fn(FetchTask) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(tasks.len(), Ordering::SeqCst);

        let total_batches = tasks.len().div_ceil(self.quota_per_window);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let mut pending: VecDeque<(usize, FetchTask)> = tasks.into_iter().enumerate().collect();
        let mut outcomes: Vec<(usize, TaskOutcome<T>)> = Vec::with_capacity(pending.len());
        let mut skipped = Vec::new();
        let mut batches_dispatched = 0usize;
        let mut cancelled = false;

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                cancelled = true;
                warn!(
                    "Cancellation requested, leaving {} tasks undispatched",
                    pending.len()
                );
                skipped.extend(pending.drain(..).map(|(_, task)| task));
                break;
            }

            if batches_dispatched > 0 {
                debug!(
                    "Quota window exhausted, cooling down {:?}",
                    self.window_cooldown
                );
                sleep(self.window_cooldown).await;
            }

            let batch: Vec<(usize, FetchTask)> = pending
                .drain(..self.quota_per_window.min(pending.len()))
                .collect();
            batches_dispatched += 1;
            debug!(
                "Dispatching batch {}/{} ({} tasks)",
                batches_dispatched,
                total_batches,
                batch.len()
            );

            let mut handles = Vec::with_capacity(batch.len());
            for (index, task) in batch {
                let semaphore = Arc::clone(&semaphore);
                let completed = Arc::clone(&self.completed);
                let op = op.clone();
                let dispatched = task.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("concurrency gate closed");
                    debug!(
                        "Task {} dispatched: {} {}",
                        index, dispatched.instrument.symbol, dispatched.window
                    );
                    let result = op(dispatched).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    result
                });
                handles.push((index, task, handle));
            }

            // Batch barrier: every task reaches Succeeded or Failed before
            // the next quota window opens.
            for (index, task, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(SyncError::Internal(format!("Fetch task aborted: {}", e))),
                };
                if let Err(e) = &result {
                    warn!(
                        "Task for {} {} failed [{}]: {}",
                        task.instrument.symbol,
                        task.window,
                        e.error_code(),
                        e
                    );
                }
                outcomes.push((index, TaskOutcome { task, result }));
            }
        }

        outcomes.sort_by_key(|(index, _)| *index);
        let run = BatchRun {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            skipped,
            batches_dispatched,
            cancelled,
        };
        info!(
            "Batch run complete: {}/{} tasks succeeded in {} batches",
            run.succeeded(),
            run.outcomes.len() + run.skipped.len(),
            run.batches_dispatched
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate};

    use crate::types::{FetchWindow, Instrument};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn instrument(symbol: &str) -> Instrument {
        Instrument {
            id: symbol.to_lowercase(),
            external_id: format!("X-{}", symbol),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            currency: "USD".to_string(),
        }
    }

    fn task(symbol: &str, day: u32) -> FetchTask {
        FetchTask {
            instrument: instrument(symbol),
            window: FetchWindow {
                start: d(2024, 1, day),
                end: d(2024, 1, day),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_batches_and_cooldowns() {
        let batcher = QuotaBatcher::new(10, Duration::from_secs(60), 4);
        let tasks: Vec<FetchTask> = (1..=25).map(|day| task("ACME", day)).collect();

        let inflight = Arc::new(AtomicUsize::new(0));
        let max_inflight = Arc::new(AtomicUsize::new(0));
        let op_inflight = Arc::clone(&inflight);
        let op_max = Arc::clone(&max_inflight);
        let started = tokio::time::Instant::now();

        let run = batcher
            .run(
                tasks,
                move |task: FetchTask| {
                    let inflight = Arc::clone(&op_inflight);
                    let max_inflight = Arc::clone(&op_max);
                    async move {
                        let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inflight.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(10)).await;
                        inflight.fetch_sub(1, Ordering::SeqCst);
                        Ok(task.window)
                    }
                },
                &CancelFlag::new(),
            )
            .await;

        // 25 tasks at 10 per quota window: 3 batches, 2 cooldowns
        assert_eq!(run.batches_dispatched, 3);
        assert_eq!(run.outcomes.len(), 25);
        assert_eq!(run.succeeded(), 25);
        assert!(!run.cancelled);
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert!(max_inflight.load(Ordering::SeqCst) <= 4);
        assert_eq!(batcher.progress(), (25, 25));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_siblings() {
        let batcher = QuotaBatcher::new(10, Duration::from_millis(1), 4);
        let tasks = vec![task("AAA", 1), task("BBB", 1), task("CCC", 1)];

        let run = batcher
            .run(
                tasks,
                |task: FetchTask| async move {
                    if task.instrument.symbol == "BBB" {
                        Err(SyncError::MalformedRequest("bad request".to_string()))
                    } else {
                        Ok(())
                    }
                },
                &CancelFlag::new(),
            )
            .await;

        assert_eq!(run.outcomes.len(), 3);
        assert_eq!(run.outcomes[0].state(), TaskState::Succeeded);
        assert_eq!(run.outcomes[1].state(), TaskState::Failed);
        assert_eq!(run.outcomes[2].state(), TaskState::Succeeded);
        assert_eq!(run.failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_dispatch_of_later_batches() {
        let batcher = QuotaBatcher::new(1, Duration::from_secs(1), 1);
        let tasks = vec![task("AAA", 1), task("AAA", 2), task("AAA", 3)];
        let cancel = CancelFlag::new();
        let cancel_inside = cancel.clone();

        let run = batcher
            .run(
                tasks,
                move |_task: FetchTask| {
                    let cancel = cancel_inside.clone();
                    async move {
                        // First task flips the flag while it is in flight
                        cancel.cancel();
                        Ok(())
                    }
                },
                &cancel,
            )
            .await;

        assert!(run.cancelled);
        assert_eq!(run.outcomes.len(), 1);
        assert_eq!(run.outcomes[0].state(), TaskState::Succeeded);
        assert_eq!(run.skipped.len(), 2);
        assert_eq!(run.batches_dispatched, 1);
    }

    #[tokio::test]
    async fn test_outcomes_keep_planning_order() {
        let batcher = QuotaBatcher::new(10, Duration::from_millis(1), 8);
        let tasks: Vec<FetchTask> = (1..=9).map(|day| task("ACME", day)).collect();

        let run = batcher
            .run(
                tasks,
                |task: FetchTask| async move {
                    // Later windows finish first
                    sleep(Duration::from_millis(20u64.saturating_sub(task.window.start.day() as u64))).await;
                    Ok(task.window.start)
                },
                &CancelFlag::new(),
            )
            .await;

        let starts: Vec<u32> = run
            .outcomes
            .iter()
            .map(|o| o.task.window.start.day())
            .collect();
        assert_eq!(starts, (1..=9).collect::<Vec<u32>>());
    }
}
