// Scheduled executor for periodic background tasks (session sweeping).
// Adapted for async/tokio runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// A task that runs periodically until told otherwise
pub trait ScheduledTask: Send + Sync + 'static {
    /// Execute one tick of the task
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;

    /// Check if the task should terminate
    /// Default: never terminate (run forever)
    fn should_terminate(&self) -> bool {
        false
    }
}

/// Blanket implementation for Arc<T> where T: ScheduledTask
/// This allows passing Arc-wrapped tasks directly to the executor
impl<T: ScheduledTask> ScheduledTask for Arc<T> {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        (**self).run()
    }

    fn should_terminate(&self) -> bool {
        (**self).should_terminate()
    }
}

/// Runs a [`ScheduledTask`] at a fixed interval on the tokio runtime
pub struct ScheduledExecutor {
    interval: Duration,
    task_name: String,
    shutdown: Arc<AtomicBool>,
}

impl ScheduledExecutor {
    pub fn new(task_name: impl Into<String>, interval: Duration) -> Self {
        Self { task_name: task_name.into(), interval, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    /// Handle that stops the executor from another task
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Drive the task until shutdown or `should_terminate()`.
    ///
    /// The first tick fires after one full interval, not immediately.
    pub async fn start<T>(self, task: T)
    where
        T: ScheduledTask,
    {
        tracing::info!(
            "Starting scheduled task '{}' with interval: {:?}",
            self.task_name,
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() yields immediately on the first tick; consume it
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if self.shutdown.load(Ordering::Relaxed) || task.should_terminate() {
                tracing::info!("Scheduled task '{}' is shutting down", self.task_name);
                break;
            }

            if let Err(e) = task.run().await {
                tracing::error!("Scheduled task '{}' failed: {}", self.task_name, e);
            }
        }

        tracing::info!("Scheduled task '{}' stopped", self.task_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct TestTask {
        counter: Arc<AtomicU32>,
        max_runs: u32,
    }

    impl ScheduledTask for TestTask {
        fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
            Box::pin(async move {
                self.counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        }

        fn should_terminate(&self) -> bool {
            self.counter.load(Ordering::Relaxed) >= self.max_runs
        }
    }

    #[tokio::test]
    async fn test_scheduled_executor_terminates() {
        let counter = Arc::new(AtomicU32::new(0));
        let task = TestTask { counter: counter.clone(), max_runs: 3 };

        let executor = ScheduledExecutor::new("test", Duration::from_millis(10));
        executor.start(task).await;

        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_shutdown_handle_stops_executor() {
        let counter = Arc::new(AtomicU32::new(0));
        let task = TestTask { counter: counter.clone(), max_runs: u32::MAX };

        let executor = ScheduledExecutor::new("test", Duration::from_millis(10));
        let handle = executor.shutdown_handle();

        let join = tokio::spawn(executor.start(task));
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.store(true, Ordering::Relaxed);
        join.await.expect("executor task panicked");

        assert!(counter.load(Ordering::Relaxed) >= 1);
    }
}
