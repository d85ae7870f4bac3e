//! Periodic worker draining the persisted task queue.
//!
//! One task per tick batch is claimed with a conditional update (the row is
//! the lock), dispatched, and accounted: success marks it processed, an
//! error increments the retry counter and, once the budget is exhausted,
//! marks it failed. Dispatcher panics are contained and recorded like any
//! other failure.

use crate::{metrics, repository::SchedulerRepository, types::Task};
use chrono::Utc;
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_BATCH_SIZE: u64 = 100;

#[async_trait::async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: &Task) -> Result<(), anyhow::Error>;
}

pub struct SchedulerWorker {
    repository: Arc<dyn SchedulerRepository>,
    dispatcher: Arc<dyn TaskDispatcher>,
    interval: Duration,
    batch_size: u64,
    stop: CancellationToken,
}

impl SchedulerWorker {
    /// Non-positive interval or batch size fall back to the defaults.
    pub fn new(
        repository: Arc<dyn SchedulerRepository>,
        dispatcher: Arc<dyn TaskDispatcher>,
        interval: Duration,
        batch_size: u64,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            interval: if interval.is_zero() {
                DEFAULT_INTERVAL
            } else {
                interval
            },
            batch_size: if batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
            stop: CancellationToken::new(),
        }
    }

    /// Local stop signal, honored in addition to the external cancellation
    /// token passed to [`run`](Self::run).
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Processes one batch immediately, then one per tick, until either the
    /// external token or the local stop signal fires. The current iteration
    /// always drains before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(interval = ?self.interval, batch_size = self.batch_size, "scheduler worker started");

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => self.process_due_tasks().await,
            }
        }

        tracing::info!("scheduler worker stopped");
    }

    async fn process_due_tasks(&self) {
        let tasks = match self
            .repository
            .list_pending(Utc::now(), self.batch_size)
            .await
        {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::error!(error = ?err, "failed to list pending tasks");
                return;
            }
        };

        for task in tasks {
            self.process_task(task).await;
        }
    }

    async fn process_task(&self, task: Task) {
        match self.repository.claim(task.id).await {
            Ok(true) => {}
            // another worker won the claim
            Ok(false) => return,
            Err(err) => {
                tracing::error!(task_id = %task.id, error = ?err, "failed to claim task");
                return;
            }
        }

        let outcome = match AssertUnwindSafe(self.dispatcher.dispatch(&task))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(panic) => Err(panic_message(panic)),
        };

        match outcome {
            Ok(()) => {
                if let Err(err) = self.repository.mark_processed(task.id).await {
                    tracing::error!(task_id = %task.id, error = ?err, "failed to mark task processed");
                    return;
                }
                metrics::SCHEDULER_TASKS_TOTAL
                    .with_label_values(&["processed"])
                    .inc();
                tracing::debug!(task_id = %task.id, task_type = %task.task_type, "task processed");
            }
            Err(dispatch_err) => {
                tracing::warn!(task_id = %task.id, task_type = %task.task_type, error = %dispatch_err, "task dispatch failed");
                match self.repository.increment_retries(task.id, &dispatch_err).await {
                    Ok(retries) if retries >= task.max_retries => {
                        if let Err(err) =
                            self.repository.mark_failed(task.id, &dispatch_err).await
                        {
                            tracing::error!(task_id = %task.id, error = ?err, "failed to mark task failed");
                            return;
                        }
                        metrics::SCHEDULER_TASKS_TOTAL
                            .with_label_values(&["failed"])
                            .inc();
                    }
                    Ok(_) => {
                        metrics::SCHEDULER_TASKS_TOTAL
                            .with_label_values(&["retried"])
                            .inc();
                    }
                    Err(err) => {
                        tracing::error!(task_id = %task.id, error = ?err, "failed to record task retry");
                    }
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("dispatcher panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("dispatcher panicked: {message}")
    } else {
        "dispatcher panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ServiceError,
        types::{NewTask, TaskStatus},
    };
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use uuid::Uuid;

    #[derive(Default)]
    struct InMemoryTasks {
        tasks: Mutex<HashMap<Uuid, Task>>,
    }

    impl InMemoryTasks {
        fn insert_due(&self, max_retries: i32) -> Uuid {
            let id = Uuid::new_v4();
            self.tasks.lock().insert(
                id,
                Task {
                    id,
                    entity_id: Uuid::new_v4(),
                    task_type: "event_reminder".into(),
                    payload: serde_json::json!({}),
                    status: TaskStatus::Pending,
                    scheduled_at: Utc::now() - chrono::Duration::seconds(1),
                    retries: 0,
                    max_retries,
                    last_error: None,
                    processed_at: None,
                },
            );
            id
        }

        fn get_sync(&self, id: Uuid) -> Task {
            self.tasks.lock().get(&id).unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SchedulerRepository for InMemoryTasks {
        async fn create(&self, new: NewTask) -> Result<Task, ServiceError> {
            let task = Task {
                id: Uuid::new_v4(),
                entity_id: new.entity_id,
                task_type: new.task_type,
                payload: new.payload,
                status: TaskStatus::Pending,
                scheduled_at: new.scheduled_at,
                retries: 0,
                max_retries: new.max_retries,
                last_error: None,
                processed_at: None,
            };
            self.tasks.lock().insert(task.id, task.clone());
            Ok(task)
        }

        async fn get(&self, id: Uuid) -> Result<Task, ServiceError> {
            self.tasks
                .lock()
                .get(&id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("scheduler task {id}")))
        }

        async fn list_pending(
            &self,
            before: DateTime<Utc>,
            limit: u64,
        ) -> Result<Vec<Task>, ServiceError> {
            let mut due = self
                .tasks
                .lock()
                .values()
                .filter(|t| {
                    t.status == TaskStatus::Pending
                        && t.scheduled_at <= before
                        && t.retries < t.max_retries
                })
                .cloned()
                .collect::<Vec<_>>();
            due.sort_by_key(|t| t.scheduled_at);
            due.truncate(limit as usize);
            Ok(due)
        }

        async fn claim(&self, id: Uuid) -> Result<bool, ServiceError> {
            let mut tasks = self.tasks.lock();
            match tasks.get_mut(&id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::Processing;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_processed(&self, id: Uuid) -> Result<(), ServiceError> {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(&id).unwrap();
            task.status = TaskStatus::Processed;
            task.processed_at = Some(Utc::now());
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), ServiceError> {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(&id).unwrap();
            task.status = TaskStatus::Failed;
            task.last_error = Some(error.to_string());
            Ok(())
        }

        async fn increment_retries(&self, id: Uuid, error: &str) -> Result<i32, ServiceError> {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(&id).unwrap();
            task.retries += 1;
            task.status = TaskStatus::Pending;
            task.last_error = Some(error.to_string());
            Ok(task.retries)
        }
    }

    struct FailingDispatcher {
        succeed_after: usize,
        attempts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TaskDispatcher for FailingDispatcher {
        async fn dispatch(&self, _task: &Task) -> Result<(), anyhow::Error> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.succeed_after {
                anyhow::bail!("messenger unavailable")
            }
            Ok(())
        }
    }

    struct PanickingDispatcher;

    #[async_trait::async_trait]
    impl TaskDispatcher for PanickingDispatcher {
        async fn dispatch(&self, _task: &Task) -> Result<(), anyhow::Error> {
            panic!("payload decode blew up")
        }
    }

    fn worker(
        repo: Arc<InMemoryTasks>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> SchedulerWorker {
        SchedulerWorker::new(repo, dispatcher, Duration::from_secs(1), 10)
    }

    #[tokio::test]
    async fn exhausted_retries_end_in_failed_with_the_full_count() {
        let repo = Arc::new(InMemoryTasks::default());
        let id = repo.insert_due(3);
        let worker = worker(
            repo.clone(),
            Arc::new(FailingDispatcher {
                succeed_after: usize::MAX,
                attempts: AtomicUsize::new(0),
            }),
        );

        for _ in 0..5 {
            worker.process_due_tasks().await;
        }

        let task = repo.get_sync(id);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retries, 3);
        assert_eq!(task.last_error.as_deref(), Some("messenger unavailable"));
    }

    #[tokio::test]
    async fn success_on_the_second_attempt_keeps_one_retry() {
        let repo = Arc::new(InMemoryTasks::default());
        let id = repo.insert_due(3);
        let worker = worker(
            repo.clone(),
            Arc::new(FailingDispatcher {
                succeed_after: 1,
                attempts: AtomicUsize::new(0),
            }),
        );

        worker.process_due_tasks().await;
        assert_eq!(repo.get_sync(id).status, TaskStatus::Pending);

        worker.process_due_tasks().await;
        let task = repo.get_sync(id);
        assert_eq!(task.status, TaskStatus::Processed);
        assert_eq!(task.retries, 1);
        assert!(task.processed_at.is_some());
    }

    #[tokio::test]
    async fn a_panicking_dispatcher_is_recorded_and_does_not_kill_the_loop() {
        let repo = Arc::new(InMemoryTasks::default());
        let id = repo.insert_due(1);
        let worker = worker(repo.clone(), Arc::new(PanickingDispatcher));

        worker.process_due_tasks().await;
        // the loop survives to process another batch
        worker.process_due_tasks().await;

        let task = repo.get_sync(id);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retries, 1);
        assert!(task
            .last_error
            .as_deref()
            .unwrap()
            .contains("payload decode blew up"));
    }

    #[tokio::test]
    async fn tasks_scheduled_in_the_future_are_left_alone() {
        let repo = Arc::new(InMemoryTasks::default());
        let task = repo
            .create(NewTask {
                entity_id: Uuid::new_v4(),
                task_type: "event_reminder".into(),
                payload: serde_json::json!({}),
                scheduled_at: Utc::now() + chrono::Duration::hours(1),
                max_retries: 3,
            })
            .await
            .unwrap();
        let worker = worker(
            repo.clone(),
            Arc::new(FailingDispatcher {
                succeed_after: 0,
                attempts: AtomicUsize::new(0),
            }),
        );

        worker.process_due_tasks().await;
        assert_eq!(repo.get_sync(task.id).status, TaskStatus::Pending);
        assert_eq!(repo.get_sync(task.id).retries, 0);
    }

    #[tokio::test]
    async fn both_shutdown_paths_stop_the_loop() {
        let repo = Arc::new(InMemoryTasks::default());
        let dispatcher = Arc::new(FailingDispatcher {
            succeed_after: 0,
            attempts: AtomicUsize::new(0),
        });

        let worker = Arc::new(SchedulerWorker::new(
            repo.clone(),
            dispatcher.clone(),
            Duration::from_secs(3600),
            10,
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop on external cancellation")
            .unwrap();

        let worker = Arc::new(SchedulerWorker::new(
            repo,
            dispatcher,
            Duration::from_secs(3600),
            10,
        ));
        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run(CancellationToken::new()).await }
        });
        worker.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop on the local signal")
            .unwrap();
    }
}
