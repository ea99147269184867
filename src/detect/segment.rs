//! Four-cue foreground segmentation.
//!
//! `mask = (global | local | color) & dilated_edges`, followed by one open
//! and two close passes. The three darkness cues maximize recall for varied
//! contaminants; the edge gate suppresses smooth shading gradients.
//!
//! All structuring elements are the 3x3 round element, which on a pixel grid
//! is the L1 unit ball (a cross). `n` passes of it equal one pass of the L1
//! ball of radius `n`.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, dilate, open};

use crate::config::Thresholds;
use crate::detect::calibrate::BackgroundProfile;

const FOREGROUND: u8 = 255;

/// Produce the cleaned binary foreground mask (255 = candidate pixel).
///
/// `gray` must be the luma of `rgb`. The mask always has the frame's size.
pub fn segment(
    rgb: &RgbImage,
    gray: &GrayImage,
    profile: &BackgroundProfile,
    thresholds: &Thresholds,
) -> GrayImage {
    let global = global_darkness(gray, profile, thresholds);
    let local = local_darkness(gray, thresholds);
    let color = color_darkness(rgb, thresholds);
    let edges = edge_gate(gray, thresholds);

    let mut combined = GrayImage::new(gray.width(), gray.height());
    for (i, out) in combined.pixels_mut().enumerate() {
        let dark = global.as_raw()[i] | local.as_raw()[i] | color.as_raw()[i];
        *out = Luma([dark & edges.as_raw()[i]]);
    }

    let mut cleaned = combined;
    if thresholds.open_passes > 0 {
        cleaned = open(&cleaned, Norm::L1, thresholds.open_passes);
    }
    if thresholds.close_passes > 0 {
        cleaned = close(&cleaned, Norm::L1, thresholds.close_passes);
    }
    cleaned
}

/// Pixels at or below the truncated `background - darkness_offset` level.
pub(crate) fn global_darkness(
    gray: &GrayImage,
    profile: &BackgroundProfile,
    thresholds: &Thresholds,
) -> GrayImage {
    let limit = (profile.mean_intensity - thresholds.darkness_offset) as i32;
    map_gray(gray, |v| i32::from(v) <= limit)
}

/// Pixels at least `adaptive_bias` darker than their Gaussian-weighted
/// neighborhood. Independent of global brightness.
pub(crate) fn local_darkness(gray: &GrayImage, thresholds: &Thresholds) -> GrayImage {
    let sigma = block_sigma(thresholds.adaptive_block_size);
    let local_mean = gaussian_blur_f32(gray, sigma);
    let bias = thresholds.adaptive_bias;

    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((src, mean), dst) in gray
        .pixels()
        .zip(local_mean.pixels())
        .zip(out.pixels_mut())
    {
        if i16::from(src.0[0]) <= i16::from(mean.0[0]) - bias {
            *dst = Luma([FOREGROUND]);
        }
    }
    out
}

/// Pixels whose HSV value channel (max of R, G, B) is at most `value_max`.
pub(crate) fn color_darkness(rgb: &RgbImage, thresholds: &Thresholds) -> GrayImage {
    let mut out = GrayImage::new(rgb.width(), rgb.height());
    for (src, dst) in rgb.pixels().zip(out.pixels_mut()) {
        let [r, g, b] = src.0;
        if r.max(g).max(b) <= thresholds.value_max {
            *dst = Luma([FOREGROUND]);
        }
    }
    out
}

/// Canny edges widened by `edge_dilate_passes` round-element dilations.
pub(crate) fn edge_gate(gray: &GrayImage, thresholds: &Thresholds) -> GrayImage {
    let edges = canny(gray, thresholds.canny_low, thresholds.canny_high);
    if thresholds.edge_dilate_passes == 0 {
        return edges;
    }
    dilate(&edges, Norm::L1, thresholds.edge_dilate_passes)
}

/// Gaussian sigma matching a square block of `block_size` pixels.
fn block_sigma(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn map_gray(gray: &GrayImage, keep: impl Fn(u8) -> bool) -> GrayImage {
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(out.pixels_mut()) {
        if keep(src.0[0]) {
            *dst = Luma([FOREGROUND]);
        }
    }
    out
}
