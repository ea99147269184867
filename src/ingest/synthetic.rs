//! Synthetic `stub://` source.
//!
//! Renders a bright, lightly textured grain surface with dark stones that
//! drift down the frame like product on a belt. Scenes are seeded, so the
//! same frame index always renders the same pixels.
//!
//! Schedule (per 60-frame cycle): frames 0-19 are clean, frames 20-59 carry
//! one or two stones depending on the cycle.

use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::frame::{Frame, FRAME_HEIGHT, FRAME_WIDTH};

const GRAIN_BASE: [i32; 3] = [232, 226, 212];
const STONE_CORE: [i32; 3] = [52, 46, 40];
const NOISE_AMPLITUDE: i32 = 3;
const CYCLE_FRAMES: u64 = 60;
const CLEAN_FRAMES: u64 = 20;
const DRIFT_PX_PER_FRAME: u32 = 2;

/// An axis-aligned dark stone with a one-pixel mid-tone rim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stone {
    pub cx: u32,
    pub cy: u32,
    pub width: u32,
    pub height: u32,
}

impl Stone {
    pub fn square(cx: u32, cy: u32, side: u32) -> Self {
        Self {
            cx,
            cy,
            width: side,
            height: side,
        }
    }

    pub fn rect(cx: u32, cy: u32, width: u32, height: u32) -> Self {
        Self {
            cx,
            cy,
            width,
            height,
        }
    }
}

/// Render a 640x480 grain scene for `seed` with `stones` painted on top.
pub fn render_scene(seed: u64, stones: &[Stone]) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image = RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT);
    for (x, _y, px) in image.enumerate_pixels_mut() {
        // Gentle left-to-right shading, well below the edge thresholds.
        let shade = (x as i32 * 12 / FRAME_WIDTH as i32) - 6;
        let noise = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
        *px = Rgb(GRAIN_BASE.map(|c| clamp_u8(c + shade + noise)));
    }
    for stone in stones {
        paint_stone(&mut image, stone);
    }
    image
}

fn paint_stone(image: &mut RgbImage, stone: &Stone) {
    let x0 = stone.cx.saturating_sub(stone.width / 2);
    let y0 = stone.cy.saturating_sub(stone.height / 2);
    let x1 = (x0 + stone.width).min(image.width());
    let y1 = (y0 + stone.height).min(image.height());
    for y in y0..y1 {
        for x in x0..x1 {
            let rim = x == x0 || y == y0 || x + 1 == x1 || y + 1 == y1;
            let px = image.get_pixel_mut(x, y);
            *px = if rim {
                let under = px.0;
                Rgb([0usize, 1, 2].map(|i| clamp_u8((under[i] as i32 + STONE_CORE[i]) / 2)))
            } else {
                Rgb(STONE_CORE.map(clamp_u8))
            };
        }
    }
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Stones visible at `frame_index` under the built-in schedule.
pub fn scheduled_stones(frame_index: u64) -> Vec<Stone> {
    let phase = frame_index % CYCLE_FRAMES;
    if phase < CLEAN_FRAMES {
        return Vec::new();
    }
    let cycle = frame_index / CYCLE_FRAMES;
    let travel = (phase - CLEAN_FRAMES) as u32 * DRIFT_PX_PER_FRAME;
    let mut stones = vec![Stone::square(200 + (cycle % 3) as u32 * 40, 120 + travel, 22)];
    if cycle % 2 == 1 {
        stones.push(Stone::rect(470, 90 + travel, 26, 16));
    }
    stones
}

/// Synthetic frame source for `stub://` URLs.
pub struct SyntheticSource {
    name: String,
    frame_interval: Option<Duration>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    /// `frame_interval` paces delivery; `None` renders as fast as asked.
    pub fn new(name: &str, frame_interval: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            frame_interval,
            last_frame_at: None,
            frame_count: 0,
            connected: false,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to stub://{}", self.name);
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            anyhow::bail!("synthetic source not connected; call connect() first");
        }
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        let stones = scheduled_stones(self.frame_count);
        let image = render_scene(self.frame_count, &stones);
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(Frame::from_rgb(image)))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.name),
        }
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("SyntheticSource: released stub://{}", self.name);
        }
        self.connected = false;
    }
}
