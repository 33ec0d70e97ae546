//! Worker init document
//!
//! Sent once, as JSON, to every freshly spawned worker. The presence of the
//! optional `overlay`, `motion` and `device` groups decides which
//! transformation variant the worker builds.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub camera: CameraSettings,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlaySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<MotionSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSettings>,
    #[serde(default)]
    pub notification: NotificationSettings,
    #[serde(default)]
    pub recording: RecordingSettings,
    /// Time the worker lingers after stop so sinks can finish trailing writes
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl WorkerSettings {
    /// Pass-through settings with no optional groups
    pub fn simple(camera_id: impl Into<String>) -> Self {
        Self {
            camera: CameraSettings {
                id: camera_id.into(),
                jpeg_quality: default_jpeg_quality(),
            },
            overlay: None,
            motion: None,
            device: None,
            notification: NotificationSettings::default(),
            recording: RecordingSettings::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub id: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPosition {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlaySettings {
    #[serde(default)]
    pub position: OverlayPosition,
    /// Pixel size of one glyph cell
    #[serde(default = "default_overlay_scale")]
    pub scale: u32,
    #[serde(default = "default_overlay_margin")]
    pub margin: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            position: OverlayPosition::default(),
            scale: default_overlay_scale(),
            margin: default_overlay_margin(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Per-pixel luma difference that counts as change
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,
    /// Share of changed pixels that counts as motion
    #[serde(default = "default_min_changed_fraction")]
    pub min_changed_fraction: f32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            pixel_threshold: default_pixel_threshold(),
            min_changed_fraction: default_min_changed_fraction(),
        }
    }
}

/// Analysis profile used by motion detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Frames are downscaled to this width before differencing
    #[serde(default = "default_analysis_width")]
    pub analysis_width: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            analysis_width: default_analysis_width(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Consecutive motion frames before a motion event starts
    #[serde(default = "default_run_length")]
    pub start_frames: u32,
    /// Consecutive still frames before a motion event stops
    #[serde(default = "default_run_length")]
    pub stop_frames: u32,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            start_frames: default_run_length(),
            stop_frames: default_run_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Capacity of the pre-event ring buffer
    #[serde(default = "default_pre_trigger_frames")]
    pub pre_trigger_frames: usize,
    #[serde(default)]
    pub sinks: Vec<SinkSettings>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            pre_trigger_frames: default_pre_trigger_frames(),
            sinks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkSettings {
    Directory { path: PathBuf },
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_overlay_scale() -> u32 {
    2
}

fn default_overlay_margin() -> u32 {
    4
}

fn default_pixel_threshold() -> u8 {
    25
}

fn default_min_changed_fraction() -> f32 {
    0.02
}

fn default_analysis_width() -> u32 {
    160
}

fn default_run_length() -> u32 {
    1
}

fn default_pre_trigger_frames() -> usize {
    3
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_fills_defaults() {
        let settings: WorkerSettings =
            serde_json::from_str(r#"{"camera":{"id":"porch"}}"#).unwrap();

        assert_eq!(settings, WorkerSettings::simple("porch"));
        assert_eq!(settings.recording.pre_trigger_frames, 3);
        assert_eq!(settings.shutdown_grace_ms, 5_000);
    }

    #[test]
    fn text_is_accepted_as_overlay_group() {
        let settings: WorkerSettings = serde_json::from_str(
            r#"{"camera":{"id":"porch"},"text":{"position":"bottom_right"},
                "recording":{"sinks":[{"kind":"directory","path":"/tmp/rec"}]}}"#,
        )
        .unwrap();

        let overlay = settings.overlay.unwrap();
        assert_eq!(overlay.position, OverlayPosition::BottomRight);
        assert_eq!(overlay.scale, 2);
        assert_eq!(
            settings.recording.sinks,
            vec![SinkSettings::Directory {
                path: PathBuf::from("/tmp/rec")
            }]
        );
    }
}
