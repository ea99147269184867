use serde::Serialize;

use crate::frame::Frame;

/// Reference brightness of the clean product surface.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BackgroundProfile {
    /// Mean BT.601 luma of the calibration window, 0..=255.
    pub mean_intensity: f64,
    /// Mean (R, G, B) of the calibration window.
    pub mean_color: [f64; 3],
}

/// Derive a background profile from the centered window of `frame`.
///
/// `region` is the side fraction of the window (0.5 samples the middle
/// 50% x 50%). Always succeeds; the window is clamped to at least one pixel.
pub fn calibrate(frame: &Frame, region: f64) -> BackgroundProfile {
    let (x0, x1) = centered_span(frame.width(), region);
    let (y0, y1) = centered_span(frame.height(), region);

    let gray = frame.luma();
    let rgb = frame.image();

    let mut luma_sum = 0u64;
    let mut color_sum = [0u64; 3];
    for y in y0..y1 {
        for x in x0..x1 {
            luma_sum += gray.get_pixel(x, y).0[0] as u64;
            let px = rgb.get_pixel(x, y).0;
            for (acc, channel) in color_sum.iter_mut().zip(px) {
                *acc += channel as u64;
            }
        }
    }

    let count = ((x1 - x0) as u64 * (y1 - y0) as u64) as f64;
    BackgroundProfile {
        mean_intensity: luma_sum as f64 / count,
        mean_color: color_sum.map(|sum| sum as f64 / count),
    }
}

fn centered_span(len: u32, fraction: f64) -> (u32, u32) {
    let fraction = fraction.clamp(0.0, 1.0);
    let span = ((len as f64 * fraction).round() as u32).clamp(1, len.max(1));
    let start = (len - span) / 2;
    (start, start + span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FRAME_HEIGHT, FRAME_WIDTH};
    use image::{Rgb, RgbImage};

    #[test]
    fn samples_only_the_center_window() {
        // Dark border, bright center: the border must not leak into the profile.
        let mut image = RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([0, 0, 0]));
        for y in 120..360 {
            for x in 160..480 {
                image.put_pixel(x, y, Rgb([200, 180, 160]));
            }
        }
        let profile = calibrate(&Frame::from_rgb(image), 0.5);
        assert_eq!(profile.mean_color, [200.0, 180.0, 160.0]);
        let expected = (200 * 4899 + 180 * 9617 + 160 * 1868 + 8192) >> 14;
        assert_eq!(profile.mean_intensity, expected as f64);
    }

    #[test]
    fn default_window_matches_quarter_offsets() {
        assert_eq!(centered_span(640, 0.5), (160, 480));
        assert_eq!(centered_span(480, 0.5), (120, 360));
        assert_eq!(centered_span(480, 1.0), (0, 480));
        assert_eq!(centered_span(480, 0.0), (239, 240));
    }
}
