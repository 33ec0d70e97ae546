//! Replays still images from a directory as a camera stream

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use flume::Sender;
use tracing::{error, info, instrument};

use crate::config::SourceConfig;
use crate::Frame;

pub struct ReplaySource {
    frames: Vec<Bytes>,
    interval: Duration,
    cursor: usize,
    last_timestamp: u64,
}

impl ReplaySource {
    /// Load every `*.jpg` / `*.jpeg` in the directory, sorted by name
    pub fn new(config: &SourceConfig) -> std::io::Result<Self> {
        info!("Loading replay frames from {}", config.dir.display());

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&config.dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            })
            .collect();
        paths.sort();

        let frames = paths
            .iter()
            .map(|path| std::fs::read(path).map(Bytes::from))
            .collect::<std::io::Result<Vec<_>>>()?;
        if frames.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no jpeg frames in {}", config.dir.display()),
            ));
        }
        info!("Replaying {} frames at {} fps", frames.len(), config.fps);

        Ok(Self {
            frames,
            interval: Duration::from_secs_f64(1.0 / config.fps.max(1) as f64),
            cursor: 0,
            last_timestamp: 0,
        })
    }

    /// Next frame in the loop, stamped with a strictly increasing epoch ms
    pub fn next_frame(&mut self) -> Frame {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.last_timestamp = now.max(self.last_timestamp + 1);

        let payload = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Frame::new(self.last_timestamp, payload)
    }

    /// Emit frames at the configured rate until the receiver goes away
    #[instrument(skip(self, tx))]
    pub async fn run(mut self, tx: Sender<Frame>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = tx.send_async(self.next_frame()).await {
                error!("Failed to send frame: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_sorted_jpegs_with_increasing_timestamps() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(tmp.path().join("a.JPEG"), b"first").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"skip").unwrap();

        let mut source = ReplaySource::new(&SourceConfig {
            dir: tmp.path().to_path_buf(),
            fps: 10,
        })
        .unwrap();

        let frames: Vec<Frame> = (0..3).map(|_| source.next_frame()).collect();
        assert_eq!(&frames[0].payload[..], b"first");
        assert_eq!(&frames[1].payload[..], b"second");
        assert_eq!(&frames[2].payload[..], b"first");
        assert!(frames.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = ReplaySource::new(&SourceConfig {
            dir: tmp.path().to_path_buf(),
            fps: 10,
        });
        assert!(result.is_err());
    }
}
