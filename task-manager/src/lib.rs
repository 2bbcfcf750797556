use log::{debug, info};
use std::sync::Arc;
use tokio::select;
/// TaskManager runs long lived background "tasks" in a loop
///
/// - Spawn multiple long running tasks, each of which is `run` repeatedly
/// - Break the task loop when one of the following happens:
///     - External cancellation token is triggered
///     - Task chooses to end by returning [`TaskState::Break`]
///
/// TaskManager extends the tokio utils TaskTracker so every task loop is tracked and
/// [`TaskManager::wait`] resolves only once all loops have wound down
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Break,
    Continue,
}

#[async_trait::async_trait]
pub trait Task {
    fn task_name(&self) -> String;

    /// A single iteration of the task loop
    async fn run(&self) -> TaskState;
}

#[derive(Debug, Clone, Default)]
pub struct TaskManager {
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called from within a tokio runtime
    pub async fn spawn_task_loop<T>(&self, task: T)
    where
        T: Task + Send + Sync + 'static,
    {
        let cancellation_token = self.cancellation_token.clone();
        let task = Arc::new(task);
        let task_name = task.task_name();

        self.task_tracker.spawn(async move {
            let task_name = task.task_name();
            loop {
                let state = select! {
                    // Biased so that cancellation is always checked for first
                    biased;

                    _ = cancellation_token.cancelled() => {
                        info!("Received Cancellation token signal, cancelling [{task_name}] task");
                        TaskState::Break
                    }
                    state = task.run() => {
                        state
                    }
                };
                match state {
                    TaskState::Continue => {
                        debug!("Continuing [{task_name}] task loop");
                        continue;
                    }
                    TaskState::Break => {
                        debug!("[{task_name}] Task ended");
                        break;
                    }
                }
            }
        });

        debug!("Spawned task {task_name}");
    }

    pub fn cancel_all(&self) {
        self.cancellation_token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn wait(&self) {
        self.task_tracker.close();
        self.task_tracker.wait().await
    }
}
