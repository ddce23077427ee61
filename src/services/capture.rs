//! Lifecycle control for the live-capture worker.
//!
//! The supervisor owns the only capture session in the process. All state
//! transitions happen under one mutex, so a start request racing another
//! start (or a stop) observes a consistent state instead of two flags.

use crate::config::CaptureConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Settings handed to the capture worker at start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub chunk_size: u32,
    pub clip_duration_secs: u64,
}

impl From<&CaptureConfig> for CaptureSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            clip_duration_secs: config.clip_duration_secs,
        }
    }
}

/// The long-running worker that produces threat events from a live feed.
///
/// Cancellation is cooperative: implementations poll the token at chunk or
/// clip boundaries and return once it fires. They are never aborted.
#[async_trait]
pub trait CaptureWorker: Send + Sync {
    async fn run(&self, settings: CaptureSettings, cancel: CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// The one active capture session: its stop signal and the worker task.
struct CaptureSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SessionSlot {
    state: CaptureState,
    active: Option<CaptureSession>,
}

/// Starts and stops the capture worker, enforcing at most one instance.
pub struct CaptureSupervisor {
    worker: Arc<dyn CaptureWorker>,
    defaults: CaptureSettings,
    slot: Mutex<SessionSlot>,
}

impl CaptureSupervisor {
    pub fn new(worker: Arc<dyn CaptureWorker>, defaults: CaptureSettings) -> Self {
        Self {
            worker,
            defaults,
            slot: Mutex::new(SessionSlot {
                state: CaptureState::Idle,
                active: None,
            }),
        }
    }

    /// Launch the capture worker. Fails with `AlreadyRunning` unless idle.
    pub async fn start(&self, overrides: Option<CaptureSettings>) -> Result<CaptureState> {
        let mut slot = self.slot.lock().await;
        if slot.state != CaptureState::Idle {
            return Err(Error::AlreadyRunning.into());
        }

        slot.state = CaptureState::Starting;
        let settings = overrides.unwrap_or(self.defaults);
        let cancel = CancellationToken::new();

        let worker = Arc::clone(&self.worker);
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run(settings, worker_cancel).await {
                error!("Capture worker exited with error: {}", e);
            }
        });

        slot.active = Some(CaptureSession { cancel, handle });
        slot.state = CaptureState::Running;
        info!(
            "Capture started (chunk size {}, clip duration {}s)",
            settings.chunk_size, settings.clip_duration_secs
        );

        Ok(slot.state)
    }

    /// Signal the worker to stop and wait for it to exit. Fails with
    /// `NotRunning` if there is nothing to stop.
    ///
    /// The session lock is held across the wait, so a new `start` cannot
    /// begin until the previous worker has fully exited. Since the worker
    /// checks the signal at clip boundaries, this may block for up to one
    /// clip interval.
    pub async fn stop(&self) -> Result<CaptureState> {
        let mut slot = self.slot.lock().await;
        let session = match slot.active.take() {
            Some(session) => session,
            None => return Err(Error::NotRunning.into()),
        };

        slot.state = CaptureState::Stopping;
        session.cancel.cancel();

        if let Err(e) = session.handle.await {
            error!("Capture worker task failed: {}", e);
        }

        slot.state = CaptureState::Idle;
        info!("Capture stopped");

        Ok(slot.state)
    }

    /// Current supervisor state.
    pub async fn state(&self) -> CaptureState {
        self.slot.lock().await.state
    }
}

/// Production worker: runs the external detector as a child process and
/// terminates it when the stop signal fires.
pub struct DetectorProcessWorker {
    command: String,
}

impl DetectorProcessWorker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl CaptureWorker for DetectorProcessWorker {
    async fn run(&self, settings: CaptureSettings, cancel: CancellationToken) -> Result<()> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("Detector command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(parts)
            .arg("--chunk-size")
            .arg(settings.chunk_size.to_string())
            .arg("--clip-duration")
            .arg(settings.clip_duration_secs.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("Failed to launch detector: {}", e)))?;

        info!("Detector process started (pid {:?})", child.id());

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| Error::Capture(format!("Failed to wait for detector: {}", e)))?;
                if status.success() {
                    info!("Detector process exited");
                } else {
                    warn!("Detector process exited with {}", status);
                }
            }
            _ = cancel.cancelled() => {
                info!("Stop requested, terminating detector process");
                // Give the detector one clip interval to flush before
                // falling back to a hard kill.
                terminate(&mut child, settings.clip_duration_secs + 5).await;
            }
        }

        Ok(())
    }
}

async fn terminate(child: &mut Child, grace_secs: u64) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            let grace = std::time::Duration::from_secs(grace_secs);
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            warn!("Detector ignored SIGTERM after {}s, killing", grace_secs);
        }
    }
    #[cfg(not(unix))]
    let _ = grace_secs;

    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            chunk_size: 30,
            clip_duration_secs: 10,
        }
    }

    /// Runs until cancelled, then records its exit after a short delay so
    /// tests can observe that stop() really waited.
    struct BlockingWorker {
        exited: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CaptureWorker for BlockingWorker {
        async fn run(&self, _settings: CaptureSettings, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.exited.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails immediately.
    struct FailingWorker;

    #[async_trait]
    impl CaptureWorker for FailingWorker {
        async fn run(&self, _settings: CaptureSettings, _cancel: CancellationToken) -> Result<()> {
            Err(Error::Capture("camera unavailable".to_string()).into())
        }
    }

    fn blocking_supervisor() -> (CaptureSupervisor, Arc<AtomicBool>) {
        let exited = Arc::new(AtomicBool::new(false));
        let worker = Arc::new(BlockingWorker {
            exited: Arc::clone(&exited),
        });
        (CaptureSupervisor::new(worker, settings()), exited)
    }

    #[tokio::test]
    async fn test_double_start_conflicts() {
        let (supervisor, _) = blocking_supervisor();

        assert_eq!(supervisor.start(None).await.unwrap(), CaptureState::Running);

        let err = supervisor.start(None).await.unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert!(matches!(err, Error::AlreadyRunning));

        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_idle_conflicts() {
        let (supervisor, _) = blocking_supervisor();

        let err = supervisor.stop().await.unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert!(matches!(err, Error::NotRunning));
    }

    #[tokio::test]
    async fn test_stop_waits_for_worker_exit() {
        let (supervisor, exited) = blocking_supervisor();

        supervisor.start(None).await.unwrap();
        assert_eq!(supervisor.state().await, CaptureState::Running);

        let state = supervisor.stop().await.unwrap();
        assert_eq!(state, CaptureState::Idle);
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_after_stop_succeeds() {
        let (supervisor, _) = blocking_supervisor();

        supervisor.start(None).await.unwrap();
        supervisor.stop().await.unwrap();

        assert_eq!(supervisor.start(None).await.unwrap(), CaptureState::Running);
        supervisor.stop().await.unwrap();

        let err = supervisor.stop().await.unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert!(matches!(err, Error::NotRunning));
    }

    #[tokio::test]
    async fn test_concurrent_starts_have_one_winner() {
        let (supervisor, _) = blocking_supervisor();
        let supervisor = Arc::new(supervisor);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let supervisor = Arc::clone(&supervisor);
            handles.push(tokio::spawn(
                async move { supervisor.start(None).await.is_ok() },
            ));
        }

        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(supervisor.state().await, CaptureState::Running);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_failure_does_not_wedge_supervisor() {
        let supervisor = CaptureSupervisor::new(Arc::new(FailingWorker), settings());

        supervisor.start(None).await.unwrap();
        // The worker has already died; stop still cleans up the session.
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state().await, CaptureState::Idle);

        supervisor.start(None).await.unwrap();
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_receives_overridden_settings() {
        struct RecordingWorker {
            seen_chunk: Arc<AtomicU32>,
        }

        #[async_trait]
        impl CaptureWorker for RecordingWorker {
            async fn run(&self, settings: CaptureSettings, cancel: CancellationToken) -> Result<()> {
                self.seen_chunk.store(settings.chunk_size, Ordering::SeqCst);
                cancel.cancelled().await;
                Ok(())
            }
        }

        let seen_chunk = Arc::new(AtomicU32::new(0));
        let supervisor = CaptureSupervisor::new(
            Arc::new(RecordingWorker {
                seen_chunk: Arc::clone(&seen_chunk),
            }),
            settings(),
        );

        supervisor
            .start(Some(CaptureSettings {
                chunk_size: 64,
                clip_duration_secs: 5,
            }))
            .await
            .unwrap();
        supervisor.stop().await.unwrap();

        assert_eq!(seen_chunk.load(Ordering::SeqCst), 64);
    }
}
