//! Motion-triggered fan-out of processed frames to recording sinks

use tracing::{debug, warn};

use super::notify::{MotionEvent, NotificationEngine};
use super::ringbuf::PreEventBuffer;
use crate::recording::RecordingSink;
use crate::ProcessedFrame;

pub struct MotionRecorder {
    buffer: PreEventBuffer,
    notifier: Box<dyn NotificationEngine>,
    sinks: Vec<Box<dyn RecordingSink>>,
    recording: bool,
}

impl MotionRecorder {
    pub fn new(
        pre_trigger_frames: usize,
        notifier: Box<dyn NotificationEngine>,
        sinks: Vec<Box<dyn RecordingSink>>,
    ) -> Self {
        Self {
            buffer: PreEventBuffer::new(pre_trigger_frames),
            notifier,
            sinks,
            recording: false,
        }
    }

    /// Buffer the frame, forward it while recording, then apply motion transitions
    pub fn on_processed(&mut self, frame: &ProcessedFrame) {
        self.buffer.push(frame.compressed.clone());

        if self.recording {
            for sink in &mut self.sinks {
                if let Err(e) = sink.write_frame(&frame.compressed) {
                    warn!("Sink {} failed to write frame {}: {}", sink.name(), frame.timestamp, e);
                }
            }
        }

        match self.notifier.observe(frame) {
            Some(MotionEvent::Start) => self.start_recording(),
            Some(MotionEvent::Stop) => self.stop_recording(),
            None => {}
        }
    }

    fn start_recording(&mut self) {
        let buffered = self.buffer.flush();
        for sink in &mut self.sinks {
            if let Err(e) = sink.motion_start(&buffered) {
                warn!("Sink {} failed to start recording: {}", sink.name(), e);
            }
        }
        self.recording = true;
    }

    fn stop_recording(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.motion_stop() {
                warn!("Sink {} failed to stop recording: {}", sink.name(), e);
            }
        }
        self.recording = false;
    }

    /// Signal every sink that the worker is going away
    pub fn shutdown(&mut self) {
        let stats = self.buffer.stats();
        debug!(
            capacity = self.buffer.capacity(),
            written = stats.frames_written,
            flushed = stats.frames_flushed,
            dropped = stats.frames_dropped,
            "Pre-event buffer closing"
        );
        for sink in &mut self.sinks {
            if let Err(e) = sink.stop() {
                warn!("Sink {} failed to stop: {}", sink.name(), e);
            }
        }
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::pipeline::notify::MotionNotifier;
    use crate::recording;
    use crate::settings::NotificationSettings;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Write(Bytes),
        Start(Vec<Bytes>),
        Stop,
        Shutdown,
    }

    struct LogSink(Arc<Mutex<Vec<Call>>>);

    impl RecordingSink for LogSink {
        fn name(&self) -> &str {
            "log"
        }

        fn write_frame(&mut self, compressed: &Bytes) -> recording::Result<()> {
            self.0.lock().unwrap().push(Call::Write(compressed.clone()));
            Ok(())
        }

        fn motion_start(&mut self, buffered: &[Bytes]) -> recording::Result<()> {
            self.0.lock().unwrap().push(Call::Start(buffered.to_vec()));
            Ok(())
        }

        fn motion_stop(&mut self) -> recording::Result<()> {
            self.0.lock().unwrap().push(Call::Stop);
            Ok(())
        }

        fn stop(&mut self) -> recording::Result<()> {
            self.0.lock().unwrap().push(Call::Shutdown);
            Ok(())
        }
    }

    fn processed(timestamp: u64, motion: bool) -> ProcessedFrame {
        ProcessedFrame {
            timestamp,
            compressed: Bytes::from(format!("t{timestamp}")),
            motion,
        }
    }

    fn recorder(pre_trigger: usize, sinks: usize) -> (MotionRecorder, Vec<Arc<Mutex<Vec<Call>>>>) {
        let logs: Vec<_> = (0..sinks).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
        let boxed = logs
            .iter()
            .map(|log| Box::new(LogSink(log.clone())) as Box<dyn RecordingSink>)
            .collect();
        let notifier = MotionNotifier::new("cam", &NotificationSettings::default());
        (MotionRecorder::new(pre_trigger, Box::new(notifier), boxed), logs)
    }

    #[test]
    fn motion_start_flushes_pre_event_frames_to_every_sink() {
        let (mut recorder, logs) = recorder(3, 2);
        let flags = [false, false, true, true, false];
        for (i, &motion) in flags.iter().enumerate() {
            recorder.on_processed(&processed(i as u64 + 1, motion));
            assert!(recorder.buffered() <= 3);
        }

        let t = |n: u64| Bytes::from(format!("t{n}"));
        let expected = vec![
            Call::Start(vec![t(1), t(2), t(3)]),
            Call::Write(t(4)),
            Call::Write(t(5)),
            Call::Stop,
        ];
        for log in &logs {
            assert_eq!(*log.lock().unwrap(), expected);
        }
        assert!(!recorder.is_recording());
    }

    #[test]
    fn buffer_is_empty_right_after_motion_start() {
        let (mut recorder, logs) = recorder(3, 1);
        for t in 1..=6 {
            recorder.on_processed(&processed(t, false));
        }
        recorder.on_processed(&processed(7, true));

        assert_eq!(recorder.buffered(), 0);
        let t = |n: u64| Bytes::from(format!("t{n}"));
        assert_eq!(logs[0].lock().unwrap()[0], Call::Start(vec![t(5), t(6), t(7)]));
    }

    #[test]
    fn shutdown_stops_every_sink() {
        let (mut recorder, logs) = recorder(3, 2);
        recorder.on_processed(&processed(1, true));
        recorder.shutdown();

        for log in &logs {
            assert_eq!(log.lock().unwrap().last(), Some(&Call::Shutdown));
        }
        assert!(!recorder.is_recording());
    }
}
