//! Transformation capability
//!
//! One variant is chosen per worker from the optional settings groups and
//! kept for the worker's lifetime.

pub mod motion;
pub mod overlay;

use std::fmt;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

use crate::error::TransformError;
use crate::settings::{OverlaySettings, WorkerSettings};
use motion::MotionDetector;

pub type Result<T> = std::result::Result<T, TransformError>;

/// Output of a single transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub compressed: Bytes,
    pub motion: bool,
}

/// Turns a raw frame into a compressed frame plus a motion flag
///
/// Errors are per frame; the worker logs them and moves on.
pub trait FrameTransform: Send {
    fn process(&mut self, raw: &Bytes, timestamp: u64) -> Result<Transformed>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Overlay, motion detection and re-encoding
    Full,
    Overlay,
    MotionDetection,
    /// Pass-through
    Simple,
}

impl TransformKind {
    pub fn select(settings: &WorkerSettings) -> Self {
        match (
            settings.overlay.is_some(),
            settings.motion.is_some(),
            settings.device.is_some(),
        ) {
            (true, true, true) => Self::Full,
            (true, _, _) => Self::Overlay,
            (false, true, true) => Self::MotionDetection,
            _ => Self::Simple,
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::Overlay => "overlay",
            Self::MotionDetection => "motion-detection",
            Self::Simple => "simple",
        };
        f.write_str(name)
    }
}

/// Build the variant selected by [`TransformKind::select`]
pub fn build(settings: &WorkerSettings) -> Box<dyn FrameTransform> {
    let quality = settings.camera.jpeg_quality;
    let overlay = settings.overlay.clone().unwrap_or_default();
    let detector = || {
        MotionDetector::new(
            settings.motion.clone().unwrap_or_default(),
            settings.device.clone().unwrap_or_default(),
        )
    };

    match TransformKind::select(settings) {
        TransformKind::Full => Box::new(Full {
            overlay,
            quality,
            detector: detector(),
        }),
        TransformKind::Overlay => Box::new(Overlay { overlay, quality }),
        TransformKind::MotionDetection => Box::new(MotionDetection {
            detector: detector(),
        }),
        TransformKind::Simple => Box::new(Simple),
    }
}

pub struct Simple;

impl FrameTransform for Simple {
    fn process(&mut self, raw: &Bytes, _timestamp: u64) -> Result<Transformed> {
        Ok(Transformed {
            compressed: raw.clone(),
            motion: false,
        })
    }
}

pub struct Overlay {
    overlay: OverlaySettings,
    quality: u8,
}

impl FrameTransform for Overlay {
    fn process(&mut self, raw: &Bytes, timestamp: u64) -> Result<Transformed> {
        let mut rgb = decode(raw)?.to_rgb8();
        overlay::draw_timestamp(&mut rgb, timestamp, &self.overlay);
        Ok(Transformed {
            compressed: encode_jpeg(&rgb, self.quality)?,
            motion: false,
        })
    }
}

/// Motion flag only; the raw frame is forwarded untouched
pub struct MotionDetection {
    detector: MotionDetector,
}

impl FrameTransform for MotionDetection {
    fn process(&mut self, raw: &Bytes, _timestamp: u64) -> Result<Transformed> {
        let image = decode(raw)?;
        Ok(Transformed {
            compressed: raw.clone(),
            motion: self.detector.detect(&image),
        })
    }
}

pub struct Full {
    overlay: OverlaySettings,
    quality: u8,
    detector: MotionDetector,
}

impl FrameTransform for Full {
    fn process(&mut self, raw: &Bytes, timestamp: u64) -> Result<Transformed> {
        let image = decode(raw)?;
        let motion = self.detector.detect(&image);

        let mut rgb = image.to_rgb8();
        overlay::draw_timestamp(&mut rgb, timestamp, &self.overlay);
        Ok(Transformed {
            compressed: encode_jpeg(&rgb, self.quality)?,
            motion,
        })
    }
}

fn decode(raw: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(raw).map_err(TransformError::Decode)
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut out = Vec::with_capacity(rgb.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(rgb)
        .map_err(TransformError::Encode)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::settings::{DeviceSettings, MotionSettings};
    use image::Rgb;

    pub(crate) fn jpeg(width: u32, height: u32, color: [u8; 3]) -> Bytes {
        let rgb = RgbImage::from_pixel(width, height, Rgb(color));
        encode_jpeg(&rgb, 90).unwrap()
    }

    #[test]
    fn selection_follows_group_precedence() {
        let mut settings = WorkerSettings::simple("cam");
        assert_eq!(TransformKind::select(&settings), TransformKind::Simple);

        settings.motion = Some(MotionSettings::default());
        assert_eq!(TransformKind::select(&settings), TransformKind::Simple);

        settings.device = Some(DeviceSettings::default());
        assert_eq!(TransformKind::select(&settings), TransformKind::MotionDetection);

        settings.overlay = Some(OverlaySettings::default());
        assert_eq!(TransformKind::select(&settings), TransformKind::Full);

        settings.device = None;
        assert_eq!(TransformKind::select(&settings), TransformKind::Overlay);
    }

    #[test]
    fn simple_passes_payload_through() {
        let raw = Bytes::from_static(b"not even a jpeg");
        let out = Simple.process(&raw, 1).unwrap();

        assert_eq!(out.compressed, raw);
        assert!(!out.motion);
    }

    #[test]
    fn overlay_reencodes_same_dimensions() {
        let mut settings = WorkerSettings::simple("cam");
        settings.overlay = Some(OverlaySettings::default());
        let mut transform = build(&settings);

        let out = transform.process(&jpeg(64, 48, [10, 10, 10]), 1_700_000_000_000).unwrap();
        let decoded = image::load_from_memory(&out.compressed).unwrap();

        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert!(!out.motion);
    }

    #[test]
    fn full_reports_motion_between_frames() {
        let mut settings = WorkerSettings::simple("cam");
        settings.overlay = Some(OverlaySettings::default());
        settings.motion = Some(MotionSettings::default());
        settings.device = Some(DeviceSettings { analysis_width: 32 });
        let mut transform = build(&settings);

        let dark = jpeg(64, 48, [0, 0, 0]);
        let bright = jpeg(64, 48, [250, 250, 250]);
        assert!(!transform.process(&dark, 1).unwrap().motion);
        assert!(!transform.process(&dark, 2).unwrap().motion);
        assert!(transform.process(&bright, 3).unwrap().motion);
    }

    #[test]
    fn undecodable_frame_is_an_error() {
        let mut settings = WorkerSettings::simple("cam");
        settings.overlay = Some(OverlaySettings::default());
        let mut transform = build(&settings);

        let err = transform.process(&Bytes::from_static(b"garbage"), 1);
        assert!(matches!(err, Err(TransformError::Decode(_))));
    }
}
