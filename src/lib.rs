//! Vigil: per-camera frame processing behind an isolated worker
//!
//! Each camera gets a [`WorkerDriver`] that owns one worker. The worker
//! transforms frames one at a time, sheds backlog when it falls behind, and
//! feeds motion-triggered recordings from a pre-event ring buffer.

pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod orchestrator;
pub mod pipeline;
pub mod protocol;
pub mod recording;
pub mod settings;
pub mod source;
pub mod transform;
pub mod worker;

pub use config::Config;
pub use driver::{DriverOptions, DriverState, Launcher, WorkerDriver};
pub use error::{DriverError, ProtocolError};
pub use frame::{Frame, ProcessedFrame};
pub use orchestrator::{LiveFrame, Orchestrator};
pub use settings::WorkerSettings;
pub use worker::{StandardFactory, Worker, WorkerExit, WorkerFactory, WorkerParts};
