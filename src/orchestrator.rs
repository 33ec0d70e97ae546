//! Per-camera orchestration
//!
//! Forwards source frames into the camera's worker driver without waiting
//! for earlier frames, and republishes every processed frame on a live
//! broadcast channel.

use std::sync::Arc;

use flume::Receiver;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::driver::{DriverOptions, Launcher, WorkerDriver};
use crate::error::DriverError;
use crate::settings::WorkerSettings;
use crate::{Frame, ProcessedFrame};

const LIVE_CHANNEL_CAPACITY: usize = 64;

/// A processed frame tagged with its camera
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub camera: Arc<str>,
    pub frame: ProcessedFrame,
}

pub struct Orchestrator {
    camera: Arc<str>,
    driver: Arc<WorkerDriver>,
    live: broadcast::Sender<LiveFrame>,
}

impl Orchestrator {
    pub fn start(
        settings: WorkerSettings,
        options: DriverOptions,
        launcher: Launcher,
    ) -> Result<Self, DriverError> {
        let camera: Arc<str> = Arc::from(settings.camera.id.as_str());
        let driver = Arc::new(WorkerDriver::start(settings, options, launcher)?);
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);

        Ok(Self {
            camera,
            driver,
            live,
        })
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn driver(&self) -> &WorkerDriver {
        &self.driver
    }

    /// Live feed of processed frames; slow subscribers skip frames
    pub fn subscribe(&self) -> broadcast::Receiver<LiveFrame> {
        self.live.subscribe()
    }

    /// Hand one frame to the worker; the result is published when it arrives
    pub fn submit(&self, frame: Frame) {
        let driver = self.driver.clone();
        let live = self.live.clone();
        let camera = self.camera.clone();

        tokio::spawn(async move {
            let timestamp = frame.timestamp;
            match driver.process_frame(frame).await {
                Ok(processed) => {
                    // No subscribers is fine
                    let _ = live.send(LiveFrame {
                        camera,
                        frame: processed,
                    });
                }
                Err(DriverError::Stopped) => {
                    debug!(camera = %camera, "Dropped frame {} during shutdown", timestamp);
                }
                Err(e) => warn!(camera = %camera, "Frame {} failed: {}", timestamp, e),
            }
        });
    }

    /// Forward every frame from `frames` until the source closes
    pub async fn run(&self, frames: Receiver<Frame>) {
        info!(camera = %self.camera, "Orchestrator running");
        while let Ok(frame) = frames.recv_async().await {
            self.submit(frame);
        }
        info!(camera = %self.camera, "Frame source closed");
    }

    pub fn stop(&self) {
        self.driver.stop();
    }
}
