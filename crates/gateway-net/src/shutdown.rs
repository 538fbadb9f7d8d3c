//! Graceful shutdown on SIGTERM/SIGINT (§5 "Resource discipline").

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Handles graceful shutdown on SIGTERM and SIGINT.
///
/// Spawns a background task that listens for either signal and cancels a
/// shared token; every long-running accept loop in the Verifier/DAP/PI
/// binaries selects on this token so an in-flight request's channel is
/// closed rather than abandoned (§5: "must release its underlying transport").
pub struct Shutdown {
    _task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl Shutdown {
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => inner.cancel(),
                _ = sigint.recv() => inner.cancel(),
            }
        });
        task_tracker.close();
        Ok(Self { _task_tracker: task_tracker, cancellation_token: outer })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self._task_tracker.wait().await;
    }
}
