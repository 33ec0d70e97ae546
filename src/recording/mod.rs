pub mod directory;

pub use directory::DirectorySink;

use bytes::Bytes;

use crate::error::RecordingError;
use crate::settings::SinkSettings;

pub type Result<T> = std::result::Result<T, RecordingError>;

/// Durable destination for motion-triggered recordings
pub trait RecordingSink: Send {
    fn name(&self) -> &str;

    /// Frame produced while a motion event is active
    fn write_frame(&mut self, compressed: &Bytes) -> Result<()>;

    /// Motion started; `buffered` holds the pre-event frames, oldest first
    fn motion_start(&mut self, buffered: &[Bytes]) -> Result<()>;

    fn motion_stop(&mut self) -> Result<()>;

    /// Worker shutdown; flush and release resources
    fn stop(&mut self) -> Result<()>;
}

pub fn build_sinks(settings: &[SinkSettings]) -> Result<Vec<Box<dyn RecordingSink>>> {
    settings
        .iter()
        .map(|sink| match sink {
            SinkSettings::Directory { path } => {
                DirectorySink::new(path).map(|s| Box::new(s) as Box<dyn RecordingSink>)
            }
        })
        .collect()
}
