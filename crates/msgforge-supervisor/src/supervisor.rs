use msgforge_core::error::RetryPolicy;
use msgforge_core::metrics::{TASK_HEALTH, TASK_RESTARTS_TOTAL};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Produces one run of a task given the cancellation token it must respect. Called again
/// for every restart, so it should be cheap and re-enter cleanly (re-reading shared state
/// from `Arc`s captured in the closure, not recreating connections per call).
pub type TaskFactory = Arc<
    dyn Fn(CancellationToken) -> BoxFuture<Result<(), msgforge_core::error::PipelineError>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Starting,
    Running,
    Restarting,
    Failed,
    Completed,
}

#[derive(Debug, Clone)]
pub struct TaskHealth {
    pub state: TaskState,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub uptime: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

struct Registration {
    name: String,
    factory: TaskFactory,
    policy: RetryPolicy,
}

/// Runs the declared set of worker tasks and keeps them alive. Registration happens
/// before [`Supervisor::start`]; tasks registered after `start` has been called are not
/// picked up (mirrors the "fixed, declared set" contract in §4.2).
pub struct Supervisor {
    pending: Mutex<Vec<Registration>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    health: Arc<Mutex<HashMap<String, TaskHealth>>>,
    root_cancel: CancellationToken,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            health: Arc::new(Mutex::new(HashMap::new())),
            root_cancel: CancellationToken::new(),
        }
    }

    /// Registers a task under `name` with the given restart policy. `factory` is invoked
    /// once per run (initial start and every restart).
    pub fn register(&self, name: impl Into<String>, factory: TaskFactory, policy: RetryPolicy) {
        let name = name.into();
        self.health.lock().unwrap().insert(
            name.clone(),
            TaskHealth { state: TaskState::Starting, last_error: None, restart_count: 0, uptime: Duration::ZERO },
        );
        self.pending.lock().unwrap().push(Registration { name, factory, policy });
    }

    /// Spawns every registered task's supervising loop. Returns once all tasks have been
    /// spawned (not once they finish — they run until cancelled or they return).
    pub async fn start(&self) {
        let registrations: Vec<Registration> = std::mem::take(&mut *self.pending.lock().unwrap());

        let mut handles = self.handles.lock().unwrap();
        for registration in registrations {
            let cancel = self.root_cancel.clone();
            let health = self.health.clone();
            handles.push(tokio::spawn(run_supervised(registration, cancel, health)));
        }
    }

    /// Cancels all tasks cooperatively and waits up to `grace` for them to finish. Tasks
    /// that do not return within the deadline are abandoned but logged (§4.2).
    pub async fn stop(&self, grace: Duration) {
        self.root_cancel.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);

        let mut remaining = handles;
        while !remaining.is_empty() {
            tokio::select! {
                _ = wait_all(&mut remaining) => break,
                _ = &mut deadline => {
                    for handle in &remaining {
                        if !handle.is_finished() {
                            tracing::warn!("task did not stop within grace deadline; abandoning");
                        }
                    }
                    for handle in remaining.drain(..) {
                        handle.abort();
                    }
                    break;
                }
            }
        }
    }

    /// `{task -> {state, last_error, restart_count, uptime}}` per §4.2.
    pub fn health(&self) -> HashMap<String, TaskHealth> {
        self.health.lock().unwrap().clone()
    }

    /// Overall status aggregated by the fraction of tasks in the `Running` state (§4.2):
    /// all running is `Healthy`, none running is `Unhealthy`, otherwise `Degraded`.
    pub fn overall_health(&self) -> OverallHealth {
        let snapshot = self.health.lock().unwrap();
        if snapshot.is_empty() {
            return OverallHealth::Healthy;
        }
        let running = snapshot.values().filter(|h| h.state == TaskState::Running).count();
        let total = snapshot.len();
        if running == total {
            OverallHealth::Healthy
        } else if running == 0 {
            OverallHealth::Unhealthy
        } else {
            OverallHealth::Degraded
        }
    }
}

async fn wait_all(handles: &mut [JoinHandle<()>]) {
    for handle in handles.iter_mut() {
        let _ = handle.await;
    }
}

fn set_state(health: &Arc<Mutex<HashMap<String, TaskHealth>>>, name: &str, state: TaskState, last_error: Option<String>, restart_count: u32, started_at: Instant) {
    let mut guard = health.lock().unwrap();
    let entry = guard.entry(name.to_string()).or_insert_with(|| TaskHealth {
        state,
        last_error: None,
        restart_count: 0,
        uptime: Duration::ZERO,
    });
    entry.state = state;
    if last_error.is_some() {
        entry.last_error = last_error;
    }
    entry.restart_count = restart_count;
    entry.uptime = started_at.elapsed();
    TASK_HEALTH.with_label_values(&[name]).set(if state == TaskState::Running { 1 } else { 0 });
}

/// The restart loop for one task: run the factory's future, and on error back off per
/// `policy` and run again, up to `policy.max_attempts`. A successful return is
/// `Completed`; exhausting attempts is `Failed`. Neither state restarts again.
async fn run_supervised(registration: Registration, cancel: CancellationToken, health: Arc<Mutex<HashMap<String, TaskHealth>>>) {
    let Registration { name, factory, policy } = registration;
    let started_at = Instant::now();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            set_state(&health, &name, TaskState::Completed, None, attempt, started_at);
            return;
        }

        set_state(&health, &name, TaskState::Running, None, attempt, started_at);
        let result = factory(cancel.clone()).await;

        match result {
            Ok(()) => {
                tracing::info!(task = %name, "task completed");
                set_state(&health, &name, TaskState::Completed, None, attempt, started_at);
                return;
            }
            Err(_) if cancel.is_cancelled() => {
                set_state(&health, &name, TaskState::Completed, None, attempt, started_at);
                return;
            }
            Err(error) => {
                attempt += 1;
                let message = error.to_string();
                tracing::error!(task = %name, attempt, error = %message, "task failed");

                if attempt >= policy.max_attempts {
                    tracing::error!(task = %name, attempts = attempt, "task exceeded max restart attempts, marking failed");
                    set_state(&health, &name, TaskState::Failed, Some(message), attempt, started_at);
                    return;
                }

                set_state(&health, &name, TaskState::Restarting, Some(message), attempt, started_at);
                TASK_RESTARTS_TOTAL.with_label_values(&[&name]).inc();
                let delay = policy.delay_for_attempt(attempt - 1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, base_delay: StdDuration::from_millis(1), max_delay: StdDuration::from_millis(5), jitter_ratio: 0.0 }
    }

    #[tokio::test]
    async fn completed_task_is_not_restarted() {
        let supervisor = Supervisor::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let factory: TaskFactory = Arc::new(move |_cancel| {
            let calls = calls2.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        supervisor.register("demo", factory, policy(3));
        supervisor.start().await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let health = supervisor.health();
        assert_eq!(health["demo"].state, TaskState::Completed);
    }

    #[tokio::test]
    async fn failing_task_is_restarted_up_to_max_attempts_then_marked_failed() {
        let supervisor = Supervisor::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let factory: TaskFactory = Arc::new(move |_cancel| {
            let calls = calls2.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(msgforge_core::error::PipelineError::transient("boom"))
            })
        });
        supervisor.register("flaky", factory, policy(3));
        supervisor.start().await;
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let health = supervisor.health();
        assert_eq!(health["flaky"].state, TaskState::Failed);
        assert_eq!(health["flaky"].restart_count, 3);
    }

    #[tokio::test]
    async fn stop_cancels_long_running_task_within_grace() {
        let supervisor = Supervisor::new();
        let factory: TaskFactory = Arc::new(|cancel: CancellationToken| {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(())
            })
        });
        supervisor.register("long_runner", factory, policy(3));
        supervisor.start().await;
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        supervisor.stop(StdDuration::from_millis(500)).await;
        let health = supervisor.health();
        assert_eq!(health["long_runner"].state, TaskState::Completed);
    }

    #[tokio::test]
    async fn overall_health_degrades_when_some_tasks_are_not_running() {
        let supervisor = Supervisor::new();
        let ok: TaskFactory = Arc::new(|cancel: CancellationToken| {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(())
            })
        });
        let fails: TaskFactory = Arc::new(|_cancel| Box::pin(async move { Err(msgforge_core::error::PipelineError::transient("x")) }));
        supervisor.register("stays_up", ok, policy(3));
        supervisor.register("dies", fails, policy(1));
        supervisor.start().await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(supervisor.overall_health(), OverallHealth::Degraded);
    }
}
