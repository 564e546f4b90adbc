//! # Supervised Background Tasks
//!
//! Every periodic loop of the SDK runs on a tokio task owned by the
//! [`Scheduler`]. A task that panics is restarted after a delay; its
//! recovery hook runs first so no in-flight work is orphaned.
//!
//! ```text
//!   supervise(name, make, recover)
//!        │
//!        ▼
//!   ┌──────────────┐  clean exit / cancelled  ┌──────┐
//!   │ spawn(make)  │ ───────────────────────► │ done │
//!   └──────┬───────┘                          └──────┘
//!          │ panic
//!          ▼
//!   recover() ──► sleep(restart_delay) ──► spawn(make) again
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Delay before a panicked task is started again.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

pub struct Scheduler {
    cancel: CancellationToken,
    restart_delay: Duration,
    restarts: Arc<AtomicU32>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(restart_delay: Duration) -> Self {
        Scheduler {
            cancel: CancellationToken::new(),
            restart_delay,
            restarts: Arc::new(AtomicU32::new(0)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Runs `make(cancel)` until it returns or the scheduler shuts down.
    ///
    /// `make` must observe the token it is given and return once it fires.
    pub fn supervise<F, Fut, R>(&self, name: &'static str, make: F, recover: R)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        let cancel = self.cancel.clone();
        let restart_delay = self.restart_delay;
        let restarts = self.restarts.clone();

        let supervisor = tokio::spawn(async move {
            debug!(task = name, "Task started");
            loop {
                let outcome = tokio::spawn(make(cancel.clone())).await;

                match outcome {
                    Ok(()) => break,
                    Err(e) if e.is_panic() && !cancel.is_cancelled() => {
                        let count = restarts.fetch_add(1, Ordering::Relaxed) + 1;
                        error!(
                            task = name,
                            restarts = count,
                            delay_ms = restart_delay.as_millis() as u64,
                            "Task panicked, restarting"
                        );
                        recover();

                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(restart_delay) => {}
                        }
                    }
                    Err(_) => break,
                }
            }
            debug!(task = name, "Task stopped");
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(supervisor);
    }

    /// Total restarts across all supervised tasks.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels every task and waits for them to stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Supervisor ended abnormally");
            }
        }

        if count > 0 {
            info!(tasks = count, "Background tasks stopped");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RESTART_DELAY)
    }
}
