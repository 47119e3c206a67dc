use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{snapshot::SnapshotError, state::AppState};

/// A background job that runs `tick` once per period until stopped.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            info!("Starting {} task every {:?}", name, period);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                tick().await;
            }
        });

        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolves once the task has ended on its own, which only a panicking
    /// tick can cause.
    pub async fn exited(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    pub fn stop(self) {
        self.handle.abort();
        debug!("Stopped {} task", self.name);
    }
}

/// Waits for the first of `tasks` to end, logs why, and returns its name.
/// Never resolves for an empty list.
pub async fn watch(tasks: &mut [PeriodicTask]) -> &'static str {
    if tasks.is_empty() {
        std::future::pending::<()>().await;
    }

    let exits = tasks.iter_mut().map(|task| {
        Box::pin(async move {
            let result = task.exited().await;
            (task.name(), result)
        })
    });
    let ((name, result), _, _) = futures::future::select_all(exits).await;

    match result {
        Err(e) if e.is_panic() => error!("{} task panicked: {}", name, e),
        Err(e) => error!("{} task was cancelled: {}", name, e),
        Ok(()) => error!("{} task exited unexpectedly", name),
    }
    name
}

pub fn spawn_broadcaster(state: Arc<AppState>, period: Duration) -> PeriodicTask {
    PeriodicTask::spawn("broadcast", period, move || {
        let state = state.clone();
        async move {
            state.scheduler.flush();
        }
    })
}

pub fn spawn_cooldown_sweeper(state: Arc<AppState>, period: Duration) -> PeriodicTask {
    PeriodicTask::spawn("cooldown sweep", period, move || {
        let state = state.clone();
        async move {
            state.rate_limiter.sweep(Instant::now());
        }
    })
}

pub fn spawn_autosave(state: Arc<AppState>, period: Duration) -> PeriodicTask {
    PeriodicTask::spawn("autosave", period, move || {
        let state = state.clone();
        async move {
            match state.snapshots.save().await {
                Ok(path) => debug!("Autosaved snapshot to {}", path.display()),
                Err(SnapshotError::InProgress) => {
                    debug!("Snapshot already in progress, skipping autosave")
                }
                Err(e) => error!("Autosave failed: {}", e),
            }
        }
    })
}

/// Best-effort snapshot on the way out. Does not start a second save if one
/// is already running, and gives up after `timeout`. Returns whether a
/// snapshot was written.
pub async fn shutdown_snapshot(state: &AppState, timeout: Duration) -> bool {
    if state.snapshots.is_saving() {
        warn!("Snapshot save already in progress, not starting another on shutdown");
        return false;
    }

    match tokio::time::timeout(timeout, state.snapshots.save()).await {
        Ok(Ok(path)) => {
            info!("Saved shutdown snapshot to {}", path.display());
            true
        }
        Ok(Err(SnapshotError::InProgress)) => {
            warn!("Snapshot save already in progress, not starting another on shutdown");
            false
        }
        Ok(Err(e)) => {
            error!("Shutdown snapshot failed: {}", e);
            false
        }
        Err(_) => {
            error!("Shutdown snapshot timed out after {:?}", timeout);
            false
        }
    }
}
