//! Frame-processing worker
//!
//! Runs on its own thread (in-process) or as the `frame-worker` process.
//! Requests arrive on a channel; every request already delivered is
//! ingested as one batch before the overflow check, then exactly one frame
//! is transformed before looking at the channel again.

pub mod queue;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, info, instrument, warn};

use crate::error::RecordingError;
use crate::pipeline::{MotionNotifier, MotionRecorder, NotificationEngine};
use crate::protocol::{Request, Response};
use crate::recording::{self, RecordingSink};
use crate::settings::WorkerSettings;
use crate::transform::{self, FrameTransform, TransformKind};
use crate::{Frame, ProcessedFrame};
pub use queue::{InboundQueue, INBOUND_CAPACITY};

/// Collaborators a worker builds from its init document
pub struct WorkerParts {
    pub transform: Box<dyn FrameTransform>,
    pub notifier: Box<dyn NotificationEngine>,
    pub sinks: Vec<Box<dyn RecordingSink>>,
}

pub trait WorkerFactory: Send + Sync + 'static {
    fn build(&self, settings: &WorkerSettings) -> Result<WorkerParts, RecordingError>;
}

/// Built-in transforms, [`MotionNotifier`] and configured sinks
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardFactory;

impl WorkerFactory for StandardFactory {
    fn build(&self, settings: &WorkerSettings) -> Result<WorkerParts, RecordingError> {
        Ok(WorkerParts {
            transform: transform::build(settings),
            notifier: Box::new(MotionNotifier::new(
                settings.camera.id.clone(),
                &settings.notification,
            )),
            sinks: recording::build_sinks(&settings.recording.sinks)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Ready,
    Draining,
    Stopping,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Clean,
    Failed(String),
}

impl WorkerExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

struct Active {
    transform: Box<dyn FrameTransform>,
    recorder: MotionRecorder,
    grace: Duration,
}

pub struct Worker {
    factory: Arc<dyn WorkerFactory>,
    state: WorkerState,
    queue: InboundQueue,
    active: Option<Active>,
    camera: String,
    /// Request channel disconnected; drain what is queued, then exit
    closed: bool,
}

impl Worker {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            state: WorkerState::Uninitialized,
            queue: InboundQueue::default(),
            active: None,
            camera: String::from("uninitialized"),
            closed: false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Serve requests until stop, a fatal init error or disconnection
    pub fn run(mut self, requests: Receiver<Request>, responses: Sender<Response>) -> WorkerExit {
        loop {
            if let ControlFlow::Break(exit) = self.receive(&requests, &responses) {
                return exit;
            }

            if let Some(dropped) = self.queue.enforce_capacity() {
                warn!(
                    camera = %self.camera,
                    dropped,
                    remaining = self.queue.len(),
                    "Inbound queue grew past {} frames, dropping half",
                    INBOUND_CAPACITY
                );
                metrics::counter!("vigil_frames_dropped_total", "camera" => self.camera.clone())
                    .increment(dropped as u64);
            }

            if self.state == WorkerState::Stopping {
                return self.finish(true);
            }

            match self.queue.pop() {
                Some(frame) => {
                    self.state = WorkerState::Draining;
                    if let ControlFlow::Break(exit) = self.process(frame, &responses) {
                        return exit;
                    }
                    if self.queue.is_empty() {
                        self.state = WorkerState::Ready;
                    }
                }
                None if self.closed => return self.finish(false),
                None => {}
            }
        }
    }

    /// Block while idle, then take every request already delivered
    fn receive(
        &mut self,
        requests: &Receiver<Request>,
        responses: &Sender<Response>,
    ) -> ControlFlow<WorkerExit> {
        if self.closed {
            return ControlFlow::Continue(());
        }

        if self.queue.is_empty() {
            match requests.recv() {
                Ok(request) => self.ingest(request, responses)?,
                Err(_) => {
                    self.closed = true;
                    return ControlFlow::Continue(());
                }
            }
        }

        loop {
            match requests.try_recv() {
                Ok(request) => self.ingest(request, responses)?,
                Err(TryRecvError::Empty) => return ControlFlow::Continue(()),
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    fn ingest(&mut self, request: Request, responses: &Sender<Response>) -> ControlFlow<WorkerExit> {
        match request {
            Request::Init(settings) => return self.init(&settings, responses),
            Request::Frame(frame) => match self.state {
                WorkerState::Uninitialized => {
                    warn!("Frame {} arrived before init, dropping", frame.timestamp);
                }
                WorkerState::Stopping | WorkerState::Terminated => {
                    debug!("Frame {} arrived after stop, dropping", frame.timestamp);
                }
                WorkerState::Ready | WorkerState::Draining => self.queue.push(frame),
            },
            Request::Stop => {
                if self.state != WorkerState::Stopping {
                    info!(camera = %self.camera, "Stop requested");
                    self.state = WorkerState::Stopping;
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn init(&mut self, settings: &WorkerSettings, responses: &Sender<Response>) -> ControlFlow<WorkerExit> {
        if self.active.is_some() {
            warn!(camera = %self.camera, "Worker already initialized, ignoring init");
            return ControlFlow::Continue(());
        }

        let parts = match self.factory.build(settings) {
            Ok(parts) => parts,
            Err(e) => {
                error!(camera = %settings.camera.id, "Failed to build pipeline: {}", e);
                self.state = WorkerState::Terminated;
                return ControlFlow::Break(WorkerExit::Failed(e.to_string()));
            }
        };

        self.camera = settings.camera.id.clone();
        self.active = Some(Active {
            transform: parts.transform,
            recorder: MotionRecorder::new(
                settings.recording.pre_trigger_frames,
                parts.notifier,
                parts.sinks,
            ),
            grace: Duration::from_millis(settings.shutdown_grace_ms),
        });
        if self.state == WorkerState::Uninitialized {
            self.state = WorkerState::Ready;
        }
        info!(
            camera = %self.camera,
            "Worker ready with {} transform",
            TransformKind::select(settings)
        );

        if responses.send(Response::Ready).is_err() {
            warn!(camera = %self.camera, "Driver went away during init");
            return ControlFlow::Break(self.finish(false));
        }
        ControlFlow::Continue(())
    }

    #[instrument(level = "debug", skip(self, frame, responses), fields(camera = %self.camera, timestamp = frame.timestamp))]
    fn process(&mut self, frame: Frame, responses: &Sender<Response>) -> ControlFlow<WorkerExit> {
        let Some(active) = self.active.as_mut() else {
            return ControlFlow::Continue(());
        };

        let transformed = match active.transform.process(&frame.payload, frame.timestamp) {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!(camera = %self.camera, "Failed to process frame {}: {}", frame.timestamp, e);
                metrics::counter!("vigil_transform_failures_total", "camera" => self.camera.clone())
                    .increment(1);
                return ControlFlow::Continue(());
            }
        };

        let processed = ProcessedFrame {
            timestamp: frame.timestamp,
            compressed: transformed.compressed,
            motion: transformed.motion,
        };
        metrics::counter!("vigil_frames_processed_total", "camera" => self.camera.clone())
            .increment(1);

        if responses.send(Response::Processed(processed.clone())).is_err() {
            warn!(camera = %self.camera, "Driver went away, shutting down");
            return ControlFlow::Break(self.finish(false));
        }

        active.recorder.on_processed(&processed);
        ControlFlow::Continue(())
    }

    /// Stop sinks, optionally linger for trailing writes, and terminate
    fn finish(&mut self, linger: bool) -> WorkerExit {
        let discarded = self.queue.clear();
        if discarded > 0 {
            info!(camera = %self.camera, "Discarding {} queued frames", discarded);
        }

        if let Some(active) = self.active.as_mut() {
            active.recorder.shutdown();
            if linger && !active.grace.is_zero() {
                debug!(camera = %self.camera, "Waiting {:?} before exit", active.grace);
                std::thread::sleep(active.grace);
            }
        }

        self.state = WorkerState::Terminated;
        info!(camera = %self.camera, "Worker terminated");
        WorkerExit::Clean
    }
}
