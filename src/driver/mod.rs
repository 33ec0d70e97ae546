//! Supervisor side of one camera's worker
//!
//! The driver spawns the worker, hands it the init document, correlates
//! results back to callers by timestamp and respawns the worker with
//! exponential backoff when it dies unexpectedly.

pub mod correlator;
pub mod launcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{DriverError, ProtocolError};
use crate::protocol::{Request, Response, FRAME_HEADER_SIZE, MAX_BODY_SIZE};
use crate::settings::WorkerSettings;
use crate::worker::WorkerExit;
use crate::{Frame, ProcessedFrame};
pub use correlator::Correlator;
use correlator::PendingGuard;
pub use launcher::{Launcher, SubprocessCommand, WorkerLink};

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// How long a caller waits for its result
    pub request_timeout: Duration,
    /// Consecutive restarts allowed before giving up
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_restarts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl DriverOptions {
    /// Delay before restart number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Worker spawned, init sent, not yet acknowledged
    Starting,
    Ready,
    /// Worker died unexpectedly; a restart is pending
    Crashed,
    Stopping,
    Terminated,
    /// Restart budget exhausted
    Failed,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

struct Shared {
    camera: String,
    settings: WorkerSettings,
    options: DriverOptions,
    launcher: Launcher,
    /// Request side of the live worker, if any
    link: ArcSwapOption<Sender<Request>>,
    correlator: Correlator,
    state: watch::Sender<DriverState>,
    stopped: AtomicBool,
    stop_signal: Notify,
}

type Running = (Receiver<Response>, JoinHandle<WorkerExit>);

impl Shared {
    fn launch(&self) -> Result<Running, DriverError> {
        let link = self.launcher.spawn(&self.camera)?;

        // Init is queued ahead of any frame sent through this link
        link.requests
            .send(Request::Init(Box::new(self.settings.clone())))
            .map_err(|_| DriverError::WorkerUnavailable)?;
        self.link.store(Some(Arc::new(link.requests)));

        Ok((link.responses, link.exit))
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Async request/response front of one camera's worker
pub struct WorkerDriver {
    shared: Arc<Shared>,
}

impl WorkerDriver {
    /// Spawn the worker and its supervisor; must run inside a tokio runtime
    pub fn start(
        settings: WorkerSettings,
        options: DriverOptions,
        launcher: Launcher,
    ) -> Result<Self, DriverError> {
        let (state, _) = watch::channel(DriverState::Starting);
        let shared = Arc::new(Shared {
            camera: settings.camera.id.clone(),
            settings,
            options,
            launcher,
            link: ArcSwapOption::empty(),
            correlator: Correlator::new(),
            state,
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        });

        let running = shared.launch()?;
        info!(camera = %shared.camera, "Worker started");
        tokio::spawn(supervise(shared.clone(), running));

        Ok(Self { shared })
    }

    pub fn camera(&self) -> &str {
        &self.shared.camera
    }

    pub fn state(&self) -> DriverState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.shared.state.subscribe()
    }

    /// Wait until the worker acknowledged its init document
    pub async fn ready(&self) -> Result<(), DriverError> {
        let mut state = self.shared.state.subscribe();
        let reached = state
            .wait_for(|s| *s == DriverState::Ready || s.is_terminal() || *s == DriverState::Stopping)
            .await
            .map(|s| *s)
            .map_err(|_| DriverError::Stopped)?;
        match reached {
            DriverState::Ready => Ok(()),
            DriverState::Failed => Err(DriverError::WorkerUnavailable),
            _ => Err(DriverError::Stopped),
        }
    }

    /// Wait until the driver reaches `Terminated` or `Failed`
    pub async fn terminated(&self) -> DriverState {
        let mut state = self.shared.state.subscribe();
        let reached = state.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        reached.unwrap_or_else(|_| self.state())
    }

    /// Number of frames awaiting a result
    pub fn pending(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Submit a frame and wait for its processed counterpart
    ///
    /// Timestamps must be unique among in-flight frames, and a frame must
    /// fit in one envelope body. Ingestion never waits on the worker; only
    /// this caller is suspended.
    #[instrument(level = "debug", skip(self, frame), fields(camera = %self.shared.camera, timestamp = frame.timestamp))]
    pub async fn process_frame(&self, frame: Frame) -> Result<ProcessedFrame, DriverError> {
        if self.shared.is_stopped() {
            return Err(DriverError::Stopped);
        }

        let timestamp = frame.timestamp;
        let body_len = FRAME_HEADER_SIZE + frame.payload.len();
        if body_len > MAX_BODY_SIZE {
            warn!(camera = %self.shared.camera, "Frame {} is too large to send ({} bytes)", timestamp, body_len);
            return Err(ProtocolError::Oversized(body_len).into());
        }

        let correlator = &self.shared.correlator;
        let pending = correlator.register(timestamp)?;
        let guard = PendingGuard::new(correlator, timestamp, pending.generation);

        // Stop may have swept the correlator between the check and registration
        if self.shared.is_stopped() {
            return Err(DriverError::Stopped);
        }

        let Some(requests) = self.shared.link.load_full() else {
            return Err(DriverError::WorkerUnavailable);
        };
        if requests.send(Request::Frame(frame)).is_err() {
            warn!(camera = %self.shared.camera, "Failed to send frame {} to worker", timestamp);
            return Err(DriverError::WorkerUnavailable);
        }

        match tokio::time::timeout(self.shared.options.request_timeout, pending.receiver).await {
            Ok(Ok(completion)) => {
                guard.disarm();
                completion
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(DriverError::WorkerUnavailable)
            }
            Err(_) => {
                drop(guard);
                warn!(camera = %self.shared.camera, "No result for frame {} within {:?}", timestamp, self.shared.options.request_timeout);
                metrics::counter!("vigil_requests_timed_out_total", "camera" => self.shared.camera.clone())
                    .increment(1);
                Err(DriverError::Timeout { timestamp })
            }
        }
    }

    /// Ask the worker to stop and reject everything in flight
    ///
    /// Does not wait for the worker to exit; see [`WorkerDriver::terminated`].
    /// Calling it again has no effect.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(camera = %self.shared.camera, "Stopping worker");

        self.shared.state.send_modify(|s| {
            if !s.is_terminal() {
                *s = DriverState::Stopping;
            }
        });

        match self.shared.link.load_full() {
            Some(requests) => {
                if requests.send(Request::Stop).is_err() {
                    warn!(camera = %self.shared.camera, "Worker already gone");
                }
            }
            None => debug!(camera = %self.shared.camera, "No live worker to stop"),
        }

        let abandoned = self.shared.correlator.fail_all(|| DriverError::Stopped);
        if abandoned > 0 {
            debug!(camera = %self.shared.camera, "Abandoned {} in-flight frames", abandoned);
        }
        self.shared.stop_signal.notify_one();
    }
}

impl Drop for WorkerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn supervise(shared: Arc<Shared>, running: Running) {
    let mut current = Some(running);
    let mut attempt = 0u32;

    loop {
        if let Some((responses, exit)) = current.take() {
            while let Ok(response) = responses.recv_async().await {
                match response {
                    Response::Ready => {
                        attempt = 0;
                        shared.state.send_if_modified(|s| {
                            let starting = *s == DriverState::Starting;
                            if starting {
                                *s = DriverState::Ready;
                            }
                            starting
                        });
                        debug!(camera = %shared.camera, "Worker ready");
                    }
                    Response::Processed(frame) => {
                        let timestamp = frame.timestamp;
                        if !shared.correlator.resolve(frame) {
                            debug!(camera = %shared.camera, "No caller waiting for frame {}", timestamp);
                        }
                    }
                }
            }

            let exit = exit
                .await
                .unwrap_or_else(|e| WorkerExit::Failed(e.to_string()));
            shared.link.store(None);

            if shared.is_stopped() {
                if let WorkerExit::Failed(reason) = &exit {
                    warn!(camera = %shared.camera, "Worker exited uncleanly during stop: {}", reason);
                }
                info!(camera = %shared.camera, "Worker terminated");
                shared.state.send_replace(DriverState::Terminated);
                return;
            }
            error!(camera = %shared.camera, "Worker exited unexpectedly: {:?}", exit);
        }

        shared.state.send_replace(DriverState::Crashed);
        let rejected = shared.correlator.fail_all(|| DriverError::WorkerCrashed);
        if rejected > 0 {
            warn!(camera = %shared.camera, "Rejected {} in-flight frames", rejected);
        }

        attempt += 1;
        if attempt > shared.options.max_restarts {
            error!(
                camera = %shared.camera,
                "Worker failed {} times in a row, giving up",
                attempt
            );
            shared.state.send_replace(DriverState::Failed);
            return;
        }

        let backoff = shared.options.backoff(attempt);
        warn!(
            camera = %shared.camera,
            "Restarting worker in {:?} (attempt {}/{})",
            backoff,
            attempt,
            shared.options.max_restarts
        );
        metrics::counter!("vigil_worker_restarts_total", "camera" => shared.camera.clone())
            .increment(1);

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shared.stop_signal.notified() => {}
        }
        if shared.is_stopped() {
            shared.state.send_replace(DriverState::Terminated);
            return;
        }

        shared.state.send_replace(DriverState::Starting);
        match shared.launch() {
            Ok(running) => {
                // Stop raced the respawn and found no live link
                if shared.is_stopped() {
                    if let Some(requests) = shared.link.load_full() {
                        let _ = requests.send(Request::Stop);
                    }
                }
                current = Some(running);
            }
            Err(e) => error!(camera = %shared.camera, "Failed to respawn worker: {}", e),
        }
    }
}
