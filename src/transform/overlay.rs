//! Timestamp banner drawn into the frame
//!
//! Glyphs are 3x5 bitmaps, one bit per cell, rendered as `scale`-sized
//! squares. The banner reads `HH:MM:SS` in UTC.

use image::{Rgb, RgbImage};

use crate::settings::{OverlayPosition, OverlaySettings};

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const BACKGROUND: Rgb<u8> = Rgb([16, 16, 16]);
const FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);

// Rows top to bottom, bit 2 is the left column
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];
const COLON: [u8; 5] = [0b000, 0b010, 0b000, 0b010, 0b000];

/// `HH:MM:SS` for a millisecond epoch timestamp
pub fn clock_text(timestamp_ms: u64) -> String {
    let secs = (timestamp_ms / 1000) % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn glyph(c: char) -> Option<&'static [u8; 5]> {
    match c {
        ':' => Some(&COLON),
        _ => c.to_digit(10).map(|d| &DIGITS[d as usize]),
    }
}

pub fn draw_timestamp(image: &mut RgbImage, timestamp_ms: u64, settings: &OverlaySettings) {
    draw_text(image, &clock_text(timestamp_ms), settings);
}

/// Draw `text` on a dark banner; anything outside the image is clipped
pub fn draw_text(image: &mut RgbImage, text: &str, settings: &OverlaySettings) {
    let scale = settings.scale.max(1);
    let cells = text.chars().count() as u32;
    if cells == 0 {
        return;
    }

    // One cell of padding around the text and between glyphs
    let banner_w = cells
        .saturating_mul(GLYPH_WIDTH + 1)
        .saturating_add(1)
        .saturating_mul(scale);
    let banner_h = (GLYPH_HEIGHT + 2).saturating_mul(scale);
    let (x0, y0) = origin(image, banner_w, banner_h, settings);

    fill(image, x0, y0, banner_w, banner_h, BACKGROUND);

    let mut cursor = x0.saturating_add(scale);
    for c in text.chars() {
        if cursor >= image.width() {
            break;
        }
        if let Some(rows) = glyph(c) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (0b100 >> col) != 0 {
                        let x = cursor.saturating_add(col.saturating_mul(scale));
                        let y = y0.saturating_add((row as u32 + 1).saturating_mul(scale));
                        fill(image, x, y, scale, scale, FOREGROUND);
                    }
                }
            }
        }
        cursor = cursor.saturating_add((GLYPH_WIDTH + 1).saturating_mul(scale));
    }
}

fn origin(image: &RgbImage, w: u32, h: u32, settings: &OverlaySettings) -> (u32, u32) {
    let m = settings.margin;
    let right = image.width().saturating_sub(w.saturating_add(m));
    let bottom = image.height().saturating_sub(h.saturating_add(m));
    match settings.position {
        OverlayPosition::TopLeft => (m, m),
        OverlayPosition::TopRight => (right, m),
        OverlayPosition::BottomLeft => (m, bottom),
        OverlayPosition::BottomRight => (right, bottom),
    }
}

fn fill(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(w).min(image.width());
    let y_end = y.saturating_add(h).min(image.height());
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            image.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_text_wraps_at_midnight() {
        assert_eq!(clock_text(0), "00:00:00");
        assert_eq!(clock_text(((23 * 3600 + 59 * 60 + 7) * 1000) + 999), "23:59:07");
        assert_eq!(clock_text(86_400_000 + 61_000), "00:01:01");
    }

    #[test]
    fn banner_is_drawn_in_the_configured_corner() {
        let mut image = RgbImage::from_pixel(100, 40, Rgb([128, 128, 128]));
        let settings = OverlaySettings {
            position: OverlayPosition::BottomRight,
            scale: 1,
            margin: 2,
        };
        draw_text(&mut image, "1", &settings);

        // 1 glyph: banner 5x7 at (93, 31)
        assert_eq!(*image.get_pixel(93, 31), BACKGROUND);
        assert_eq!(*image.get_pixel(97, 37), BACKGROUND);
        assert_eq!(*image.get_pixel(92, 31), Rgb([128, 128, 128]));
        assert_eq!(*image.get_pixel(0, 0), Rgb([128, 128, 128]));
        // top row of "1" is 0b010
        assert_eq!(*image.get_pixel(95, 32), FOREGROUND);
        assert_eq!(*image.get_pixel(94, 32), BACKGROUND);
    }

    #[test]
    fn oversized_banner_is_clipped() {
        let mut image = RgbImage::new(8, 4);
        let settings = OverlaySettings {
            scale: 4,
            ..OverlaySettings::default()
        };
        draw_timestamp(&mut image, 1_700_000_000_000, &settings);
    }

    #[test]
    fn huge_scale_does_not_overflow() {
        let mut image = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
        let settings = OverlaySettings {
            position: OverlayPosition::BottomRight,
            scale: 200_000_000,
            margin: u32::MAX,
        };
        draw_timestamp(&mut image, 1_700_000_000_000, &settings);

        // The banner starts at the origin and covers the whole frame
        assert_eq!(*image.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*image.get_pixel(63, 47), BACKGROUND);
    }
}
