//! Frame overlay for streamed frames and alert snapshots.
//!
//! Each candidate gets a confidence-colored box, a `STONE #n` label tab
//! with its confidence and a center dot. The darkened banner carries the
//! status line, stone count and stability, background intensity and FPS.
//! Text uses the bundled DejaVu Sans Mono Bold face; if it fails to load,
//! the overlay is drawn without text.

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::sync::OnceLock;

use crate::detect::Candidate;
use crate::frame::Frame;
use crate::telemetry::{DetectionReport, Status};

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const GRAY: Rgb<u8> = Rgb([90, 90, 90]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const LIGHT_GRAY: Rgb<u8> = Rgb([200, 200, 200]);

const BANNER_HEIGHT: u32 = 120;
const BANNER_ALPHA: f32 = 0.4;
const BOX_THICKNESS: u32 = 2;
const LABEL_TAB_HEIGHT: u32 = 30;
const LABEL_TAB_PADDING: u32 = 60;
const CENTER_DOT_RADIUS: i32 = 4;
const STABILITY_BAR_WIDTH: u32 = 200;

const FONT_BYTES: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono-Bold.ttf");

fn font() -> Option<&'static FontArc> {
    static FONT: OnceLock<Option<FontArc>> = OnceLock::new();
    FONT.get_or_init(|| match FontArc::try_from_slice(FONT_BYTES) {
        Ok(font) => Some(font),
        Err(err) => {
            log::error!("overlay font failed to load, drawing without text: {}", err);
            None
        }
    })
    .as_ref()
}

fn draw_label(canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, size: f32, text: &str) {
    if let Some(font) = font() {
        draw_text_mut(canvas, color, x, y, PxScale::from(size), font, text);
    }
}

/// Box color for a confidence tier.
pub fn confidence_color(confidence: u8) -> Rgb<u8> {
    if confidence >= 70 {
        RED
    } else if confidence >= 50 {
        ORANGE
    } else {
        YELLOW
    }
}

/// Copy `frame` and draw candidates, then the status banner over the top.
pub fn annotate(frame: &Frame, report: &DetectionReport) -> RgbImage {
    let mut canvas = frame.image().clone();
    for (index, candidate) in report.candidates.iter().enumerate() {
        draw_candidate(&mut canvas, index + 1, candidate);
    }
    draw_banner(&mut canvas, report);
    canvas
}

fn draw_candidate(canvas: &mut RgbImage, number: usize, candidate: &Candidate) {
    let color = confidence_color(candidate.confidence);
    let b = &candidate.bounding_box;

    for inset in 0..BOX_THICKNESS {
        let w = b.w.saturating_sub(2 * inset);
        let h = b.h.saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((b.x + inset) as i32, (b.y + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, color);
    }

    let label = format!("STONE #{}", number);
    let label_width = font().map_or(0, |font| text_size(PxScale::from(14.0), font, &label).0);
    let tab_top = b.y as i32 - LABEL_TAB_HEIGHT as i32;
    let tab = Rect::at(b.x as i32, tab_top)
        .of_size(label_width + LABEL_TAB_PADDING, LABEL_TAB_HEIGHT);
    draw_filled_rect_mut(canvas, tab, color);
    draw_label(canvas, WHITE, b.x as i32 + 2, tab_top + 2, 14.0, &label);
    let confidence = format!("{}%", candidate.confidence);
    draw_label(canvas, WHITE, b.x as i32 + 2, tab_top + 16, 12.0, &confidence);

    let (cx, cy) = b.center();
    draw_filled_circle_mut(canvas, (cx as i32, cy as i32), CENTER_DOT_RADIUS, GREEN);
}

fn draw_banner(canvas: &mut RgbImage, report: &DetectionReport) {
    let banner_rows = BANNER_HEIGHT.min(canvas.height());
    let keep = 1.0 - BANNER_ALPHA;
    for y in 0..banner_rows {
        for x in 0..canvas.width() {
            let px = canvas.get_pixel_mut(x, y);
            px.0 = px.0.map(|c| (c as f32 * keep).round() as u8);
        }
    }

    let (status_color, status_text) = match report.status {
        Status::Clean => (GREEN, "CLEAN"),
        Status::Contaminated => (RED, "IMPURITY DETECTED!"),
    };
    draw_filled_rect_mut(canvas, Rect::at(10, 12).of_size(26, 26), status_color);
    draw_label(canvas, status_color, 46, 10, 28.0, status_text);

    let info = format!(
        "Stones: {} | Stability: {}/{}",
        report.count(),
        report.stability_counter,
        report.stable_frames
    );
    draw_label(canvas, WHITE, 10, 44, 18.0, &info);

    draw_filled_rect_mut(canvas, Rect::at(10, 66).of_size(STABILITY_BAR_WIDTH, 8), GRAY);
    let filled = stability_fill(
        report.stability_counter,
        report.stable_frames,
        STABILITY_BAR_WIDTH,
    );
    if filled > 0 {
        draw_filled_rect_mut(canvas, Rect::at(10, 66).of_size(filled, 8), status_color);
    }

    let background = format!("Background: {:.0}", report.background_intensity);
    draw_label(canvas, LIGHT_GRAY, 10, 80, 15.0, &background);
    draw_label(canvas, YELLOW, 10, 99, 15.0, &format!("FPS: {:.1}", report.fps));
}

/// Width of the stability bar fill, saturating at a full bar.
fn stability_fill(counter: u32, stable_frames: u32, width: u32) -> u32 {
    if stable_frames == 0 {
        return width;
    }
    (counter.min(stable_frames) as u64 * width as u64 / stable_frames as u64) as u32
}
