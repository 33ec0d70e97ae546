use thiserror::Error;

/// Failures decoding or framing IPC envelopes
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("{kind} body too short: {len} < {min}")]
    Truncated {
        kind: &'static str,
        len: usize,
        min: usize,
    },

    #[error("envelope body exceeds maximum: {0} > {max}", max = crate::protocol::MAX_BODY_SIZE)]
    Oversized(usize),

    #[error("invalid init document: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("pipe i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures surfaced to callers of the worker driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no result for frame {timestamp} before the deadline")]
    Timeout { timestamp: u64 },

    #[error("frame {0} is already in flight")]
    DuplicateTimestamp(u64),

    #[error("driver stopped")]
    Stopped,

    #[error("worker terminated while the frame was in flight")]
    WorkerCrashed,

    #[error("worker is not accepting frames")]
    WorkerUnavailable,

    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Per-frame transformation failure, never fatal to the worker
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("frame decode failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("frame encode failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink {0} is closed")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("camera id {0:?} is configured twice")]
    DuplicateCamera(String),

    #[error("camera #{0} has an empty id")]
    EmptyCameraId(usize),
}
