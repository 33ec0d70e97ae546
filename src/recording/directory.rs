//! Filesystem recording sink
//!
//! Each motion event becomes a directory of numbered JPEG files:
//! `root/event-000001/000001.jpg`, `000002.jpg`, ...

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info};

use super::{RecordingSink, Result};
use crate::error::RecordingError;

pub struct DirectorySink {
    name: String,
    root: PathBuf,
    next_event: u64,
    current: Option<OpenEvent>,
    closed: bool,
}

struct OpenEvent {
    dir: PathBuf,
    frames: u64,
}

impl DirectorySink {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        // Continue numbering after any events already on disk
        let next_event = fs::read_dir(&root)?
            .flatten()
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()?
                    .strip_prefix("event-")?
                    .parse::<u64>()
                    .ok()
            })
            .max()
            .map_or(1, |n| n + 1);

        Ok(Self {
            name: format!("directory:{}", root.display()),
            root,
            next_event,
            current: None,
            closed: false,
        })
    }

    fn write_to_event(event: &mut OpenEvent, compressed: &[u8]) -> Result<()> {
        event.frames += 1;
        let path = event.dir.join(format!("{:06}.jpg", event.frames));
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(compressed)?;
        file.flush()?;
        Ok(())
    }

    fn close_event(&mut self) {
        if let Some(event) = self.current.take() {
            info!(
                "Closed recording {} with {} frames",
                event.dir.display(),
                event.frames
            );
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RecordingError::Closed(self.name.clone()));
        }
        Ok(())
    }
}

impl RecordingSink for DirectorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_frame(&mut self, compressed: &Bytes) -> Result<()> {
        self.ensure_open()?;
        match self.current.as_mut() {
            Some(event) => Self::write_to_event(event, compressed),
            None => {
                debug!("No open event, dropping frame");
                Ok(())
            }
        }
    }

    fn motion_start(&mut self, buffered: &[Bytes]) -> Result<()> {
        self.ensure_open()?;
        self.close_event();

        let dir = self.root.join(format!("event-{:06}", self.next_event));
        self.next_event += 1;
        fs::create_dir_all(&dir)?;
        info!("Opened recording {} with {} pre-event frames", dir.display(), buffered.len());

        let event = self.current.insert(OpenEvent { dir, frames: 0 });
        for frame in buffered {
            Self::write_to_event(event, frame)?;
        }
        Ok(())
    }

    fn motion_stop(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.close_event();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.close_event();
        self.closed = true;
        Ok(())
    }
}
