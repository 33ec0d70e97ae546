//! Motion state evaluation

use tracing::info;

use crate::settings::NotificationSettings;
use crate::ProcessedFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    Start,
    Stop,
}

/// Consumes every processed frame and reports motion transitions
pub trait NotificationEngine: Send {
    fn observe(&mut self, frame: &ProcessedFrame) -> Option<MotionEvent>;
}

/// Debounced motion state machine
///
/// A motion event starts after `start_frames` consecutive motion frames and
/// stops after `stop_frames` consecutive still frames.
pub struct MotionNotifier {
    camera: String,
    start_frames: u32,
    stop_frames: u32,
    active: bool,
    run: u32,
}

impl MotionNotifier {
    pub fn new(camera: impl Into<String>, settings: &NotificationSettings) -> Self {
        Self {
            camera: camera.into(),
            start_frames: settings.start_frames.max(1),
            stop_frames: settings.stop_frames.max(1),
            active: false,
            run: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl NotificationEngine for MotionNotifier {
    fn observe(&mut self, frame: &ProcessedFrame) -> Option<MotionEvent> {
        // `run` counts consecutive frames that disagree with the current state
        if frame.motion != self.active {
            self.run += 1;
        } else {
            self.run = 0;
        }

        let threshold = if self.active {
            self.stop_frames
        } else {
            self.start_frames
        };
        if self.run < threshold {
            return None;
        }

        self.run = 0;
        self.active = !self.active;
        if self.active {
            info!(camera = %self.camera, timestamp = frame.timestamp, "Motion started");
            Some(MotionEvent::Start)
        } else {
            info!(camera = %self.camera, timestamp = frame.timestamp, "Motion stopped");
            Some(MotionEvent::Stop)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn observe_all(notifier: &mut MotionNotifier, flags: &[bool]) -> Vec<Option<MotionEvent>> {
        flags
            .iter()
            .enumerate()
            .map(|(i, &motion)| {
                notifier.observe(&ProcessedFrame {
                    timestamp: i as u64,
                    compressed: Bytes::new(),
                    motion,
                })
            })
            .collect()
    }

    #[test]
    fn single_frame_thresholds_follow_the_flag() {
        let mut notifier = MotionNotifier::new("cam", &NotificationSettings::default());
        let events = observe_all(&mut notifier, &[false, true, true, false, false]);

        assert_eq!(
            events,
            vec![None, Some(MotionEvent::Start), None, Some(MotionEvent::Stop), None]
        );
    }

    #[test]
    fn debounce_ignores_short_runs() {
        let settings = NotificationSettings {
            start_frames: 2,
            stop_frames: 3,
        };
        let mut notifier = MotionNotifier::new("cam", &settings);
        let events = observe_all(
            &mut notifier,
            &[true, false, true, true, false, false, true, false, false, false],
        );

        assert_eq!(events[3], Some(MotionEvent::Start));
        assert_eq!(events[9], Some(MotionEvent::Stop));
        assert_eq!(events.iter().flatten().count(), 2);
        assert!(!notifier.is_active());
    }
}
