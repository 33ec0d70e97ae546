//! Ways to bring up an isolated worker
//!
//! Either way the driver sees the same thing: a typed request sender, a
//! typed response receiver and a handle that resolves when the worker is
//! gone.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use flume::{Receiver, Sender};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{DriverError, ProtocolError};
use crate::protocol::{self, Request, Response};
use crate::worker::{StandardFactory, Worker, WorkerExit, WorkerFactory};

pub struct WorkerLink {
    pub requests: Sender<Request>,
    pub responses: Receiver<Response>,
    pub exit: JoinHandle<WorkerExit>,
}

#[derive(Clone)]
pub enum Launcher {
    /// Worker on a dedicated thread inside this process
    InProcess(Arc<dyn WorkerFactory>),
    /// `frame-worker` child process speaking the envelope protocol
    Subprocess(SubprocessCommand),
}

impl Default for Launcher {
    fn default() -> Self {
        Self::InProcess(Arc::new(StandardFactory))
    }
}

#[derive(Debug, Clone)]
pub struct SubprocessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SubprocessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `frame-worker` next to the running executable
    pub fn sibling() -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(
            exe.with_file_name(format!("frame-worker{}", std::env::consts::EXE_SUFFIX)),
        ))
    }
}

impl Launcher {
    pub fn spawn(&self, camera: &str) -> Result<WorkerLink, DriverError> {
        match self {
            Self::InProcess(factory) => spawn_in_process(factory.clone(), camera),
            Self::Subprocess(command) => spawn_subprocess(command, camera),
        }
    }
}

fn spawn_in_process(factory: Arc<dyn WorkerFactory>, camera: &str) -> Result<WorkerLink, DriverError> {
    let (req_tx, req_rx) = flume::unbounded();
    let (resp_tx, resp_rx) = flume::unbounded();
    let (exit_tx, exit_rx) = oneshot::channel();

    // A panic unwinds through `run`, dropping the response sender with it
    std::thread::Builder::new()
        .name(format!("worker-{camera}"))
        .spawn(move || {
            let exit = match panic::catch_unwind(AssertUnwindSafe(|| {
                Worker::new(factory).run(req_rx, resp_tx)
            })) {
                Ok(exit) => exit,
                Err(payload) => {
                    WorkerExit::Failed(format!("worker panicked: {}", panic_message(&*payload)))
                }
            };
            let _ = exit_tx.send(exit);
        })?;

    let exit = tokio::spawn(async move {
        exit_rx
            .await
            .unwrap_or_else(|_| WorkerExit::Failed("worker thread vanished".into()))
    });

    Ok(WorkerLink {
        requests: req_tx,
        responses: resp_rx,
        exit,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

fn spawn_subprocess(command: &SubprocessCommand, camera: &str) -> Result<WorkerLink, DriverError> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    debug!(camera, pid = child.id(), "Spawned {}", command.program.display());

    let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(DriverError::Spawn(std::io::Error::other(
            "worker pipes unavailable",
        )));
    };

    let (req_tx, req_rx) = flume::unbounded::<Request>();
    let (resp_tx, resp_rx) = flume::unbounded();

    let camera_w = camera.to_string();
    tokio::spawn(async move {
        while let Ok(request) = req_rx.recv_async().await {
            let last = matches!(request, Request::Stop);
            let envelope = match protocol::encode_request(&request) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(camera = %camera_w, "Failed to encode request: {}", e);
                    continue;
                }
            };
            match protocol::write_envelope_async(&mut stdin, &envelope).await {
                Ok(()) => {}
                Err(ProtocolError::Io(e)) => {
                    warn!(camera = %camera_w, "Failed to write to worker: {}", e);
                    break;
                }
                // Nothing reached the pipe, so the link is still usable
                Err(e) => {
                    warn!(camera = %camera_w, "Dropped request for worker: {}", e);
                    continue;
                }
            }
            if last {
                break;
            }
        }
        // Dropping stdin signals end of input to the worker
    });

    let camera_r = camera.to_string();
    let reader = tokio::spawn(async move {
        loop {
            match protocol::read_envelope_async(&mut stdout).await {
                Ok(Some(envelope)) => match protocol::decode_response(envelope) {
                    Ok(response) => {
                        if resp_tx.send(response).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(camera = %camera_r, "Bad message from worker: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(camera = %camera_r, "Failed to read from worker: {}", e);
                    break;
                }
            }
        }
    });

    let exit = tokio::spawn(async move {
        let status = child.wait().await;
        let _ = reader.await;
        match status {
            Ok(status) if status.success() => WorkerExit::Clean,
            Ok(status) => WorkerExit::Failed(format!("worker exited with {}", status)),
            Err(e) => WorkerExit::Failed(format!("failed to wait for worker: {}", e)),
        }
    });

    Ok(WorkerLink {
        requests: req_tx,
        responses: resp_rx,
        exit,
    })
}
