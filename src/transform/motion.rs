//! Frame-differencing motion detector

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

use crate::settings::{DeviceSettings, MotionSettings};

pub struct MotionDetector {
    settings: MotionSettings,
    analysis_width: u32,
    previous: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(settings: MotionSettings, device: DeviceSettings) -> Self {
        Self {
            settings,
            analysis_width: device.analysis_width.max(1),
            previous: None,
        }
    }

    /// Compare against the previous frame; the first frame never reports motion
    pub fn detect(&mut self, image: &DynamicImage) -> bool {
        let current = self.downscale(image);

        let motion = match &self.previous {
            Some(previous) if previous.dimensions() == current.dimensions() => {
                changed_fraction(previous, &current, self.settings.pixel_threshold)
                    >= self.settings.min_changed_fraction
            }
            _ => false,
        };

        self.previous = Some(current);
        motion
    }

    fn downscale(&self, image: &DynamicImage) -> GrayImage {
        let luma = image.to_luma8();
        let (w, h) = luma.dimensions();
        if w <= self.analysis_width {
            return luma;
        }
        let height = ((h as u64 * self.analysis_width as u64) / w as u64).max(1) as u32;
        imageops::resize(&luma, self.analysis_width, height, FilterType::Triangle)
    }
}

fn changed_fraction(a: &GrayImage, b: &GrayImage, threshold: u8) -> f32 {
    let total = a.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let changed = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .filter(|(x, y)| x.abs_diff(**y) > threshold)
        .count();
    changed as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([value])))
    }

    fn detector(min_changed_fraction: f32) -> MotionDetector {
        MotionDetector::new(
            MotionSettings {
                pixel_threshold: 20,
                min_changed_fraction,
            },
            DeviceSettings { analysis_width: 16 },
        )
    }

    #[test]
    fn first_and_identical_frames_are_still() {
        let mut detector = detector(0.01);
        assert!(!detector.detect(&gray(64, 32, 100)));
        assert!(!detector.detect(&gray(64, 32, 100)));
        assert!(!detector.detect(&gray(64, 32, 110)));
    }

    #[test]
    fn large_change_is_motion() {
        let mut detector = detector(0.5);
        detector.detect(&gray(64, 32, 0));
        assert!(detector.detect(&gray(64, 32, 200)));
    }

    #[test]
    fn small_changed_area_stays_below_fraction() {
        let mut detector = detector(0.25);
        detector.detect(&gray(16, 16, 0));

        let mut patch = GrayImage::from_pixel(16, 16, Luma([0]));
        for y in 0..4 {
            for x in 0..4 {
                patch.put_pixel(x, y, Luma([255]));
            }
        }
        assert!(!detector.detect(&DynamicImage::ImageLuma8(patch)));
    }

    #[test]
    fn resolution_change_resets_the_reference() {
        let mut detector = detector(0.01);
        detector.detect(&gray(16, 16, 0));
        assert!(!detector.detect(&gray(8, 8, 255)));
    }
}
