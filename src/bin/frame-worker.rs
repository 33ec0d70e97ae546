//! Isolated frame worker
//!
//! Speaks the envelope protocol on stdin/stdout. Logs go to stderr.

use std::io::{BufReader, BufWriter};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use vigil::error::ProtocolError;
use vigil::protocol::{self, Request, Response};
use vigil::{StandardFactory, Worker, WorkerExit};

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    let (req_tx, req_rx) = flume::unbounded::<Request>();
    let (resp_tx, resp_rx) = flume::unbounded::<Response>();

    // stdin -> requests; exits on EOF, which disconnects the worker's receiver
    std::thread::Builder::new()
        .name("ipc-reader".into())
        .spawn(move || {
            let mut stdin = BufReader::new(std::io::stdin().lock());
            loop {
                match protocol::read_envelope(&mut stdin) {
                    Ok(Some(envelope)) => match protocol::decode_request(envelope) {
                        Ok(request) => {
                            if req_tx.send(request).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Bad message from driver: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read from driver: {}", e);
                        break;
                    }
                }
            }
        })?;

    // responses -> stdout
    let writer = std::thread::Builder::new()
        .name("ipc-writer".into())
        .spawn(move || {
            let mut stdout = BufWriter::new(std::io::stdout().lock());
            for response in resp_rx.iter() {
                let envelope = protocol::encode_response(&response);
                match protocol::write_envelope(&mut stdout, &envelope) {
                    Ok(()) => {}
                    Err(ProtocolError::Io(e)) => {
                        error!("Failed to write to driver: {}", e);
                        break;
                    }
                    Err(e) => warn!("Dropped result for driver: {}", e),
                }
            }
        })?;

    let exit = Worker::new(Arc::new(StandardFactory)).run(req_rx, resp_tx);
    if writer.join().is_err() {
        return Err(eyre!("ipc writer panicked"));
    }

    match exit {
        WorkerExit::Clean => Ok(()),
        WorkerExit::Failed(reason) => Err(eyre!("worker failed: {}", reason)),
    }
}
