use bytes::Bytes;

/// Raw camera frame with zero-copy semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Producer timestamp in ms since epoch, unique per camera
    pub timestamp: u64,

    /// Immutable frame data - can be shared across threads without copying
    pub payload: Bytes,
}

impl Frame {
    pub fn new(timestamp: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }
}

/// Output of the transformation capability, correlated by timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFrame {
    pub timestamp: u64,
    pub compressed: Bytes,
    pub motion: bool,
}
