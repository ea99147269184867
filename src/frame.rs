//! Frame container and capture handoff.
//!
//! - `Frame`: immutable 640x480 RGB buffer plus its capture instant.
//! - `LatestFrameSlot`: single-slot handoff between a capture thread and the
//!   pipeline. Publishing replaces any frame not yet taken, so a slow consumer
//!   always sees the newest frame and never builds a backlog.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// Working width of every frame that enters the pipeline.
pub const FRAME_WIDTH: u32 = 640;
/// Working height of every frame that enters the pipeline.
pub const FRAME_HEIGHT: u32 = 480;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A captured frame, normalized to `FRAME_WIDTH` x `FRAME_HEIGHT`.
///
/// There is no mutable pixel access; annotation works on a copy.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an RGB image, resizing it to the working size when needed.
    pub fn from_rgb(image: RgbImage) -> Self {
        Self::from_rgb_at(image, Instant::now())
    }

    pub fn from_rgb_at(image: RgbImage, captured_at: Instant) -> Self {
        let image = if image.dimensions() == (FRAME_WIDTH, FRAME_HEIGHT) {
            image
        } else {
            imageops::resize(&image, FRAME_WIDTH, FRAME_HEIGHT, FilterType::Triangle)
        };
        Self { image, captured_at }
    }

    /// Build a frame from packed RGB8 bytes.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            anyhow!(
                "pixel buffer does not match {}x{} RGB dimensions",
                width,
                height
            )
        })?;
        Ok(Self::from_rgb(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Grayscale view using BT.601 weights in 14-bit fixed point.
    pub fn luma(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.image.width(), self.image.height());
        for (src, dst) in self.image.pixels().zip(gray.pixels_mut()) {
            let [r, g, b] = src.0;
            let y = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14;
            *dst = Luma([y.min(255) as u8]);
        }
        gray
    }
}

// ----------------------------------------------------------------------------
// LatestFrameSlot: latest-frame-wins handoff
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    closed: bool,
    replaced: u64,
    error: Option<String>,
}

/// Single-slot, latest-frame-wins handoff.
#[derive(Default)]
pub struct LatestFrameSlot {
    state: Mutex<SlotState>,
    available: Condvar,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, replacing (dropping) any frame not yet taken.
    ///
    /// Returns `false` once the slot has been closed.
    pub fn publish(&self, frame: Frame) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        if state.closed {
            return Ok(false);
        }
        if state.frame.replace(frame).is_some() {
            state.replaced += 1;
        }
        self.available.notify_one();
        Ok(true)
    }

    /// Block until a frame is available or the slot is closed.
    ///
    /// A pending frame is still handed out after `close`; `Ok(None)` means the
    /// producer is gone and nothing is left. A producer failure recorded with
    /// `close_with_error` is returned as an error on every call after that.
    pub fn take(&self) -> Result<Option<Frame>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        loop {
            if let Some(frame) = state.frame.take() {
                return Ok(Some(frame));
            }
            if state.closed {
                return match &state.error {
                    Some(error) => Err(anyhow!(error.clone())),
                    None => Ok(None),
                };
            }
            state = self
                .available
                .wait(state)
                .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        }
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.available.notify_all();
    }

    pub fn close_with_error(&self, error: String) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.error = Some(error);
        }
        self.available.notify_all();
    }

    /// True once the producer closed the slot with an error.
    pub fn has_failed(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.error.is_some())
            .unwrap_or(true)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|state| state.closed).unwrap_or(true)
    }

    /// Frames overwritten before the consumer took them.
    pub fn replaced(&self) -> u64 {
        self.state.lock().map(|state| state.replaced).unwrap_or(0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Arc;
    use std::thread;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn frames_are_normalized_to_working_size() {
        let frame = Frame::from_rgb(solid(1280, 720, 90));
        assert_eq!(frame.width(), FRAME_WIDTH);
        assert_eq!(frame.height(), FRAME_HEIGHT);
        assert_eq!(frame.image().get_pixel(10, 10).0, [90, 90, 90]);
    }

    #[test]
    fn from_raw_rejects_short_buffers() {
        assert!(Frame::from_raw(vec![0u8; 10], 640, 480).is_err());
        assert!(Frame::from_raw(vec![0u8; 640 * 480 * 3], 640, 480).is_ok());
    }

    #[test]
    fn luma_uses_bt601_weights() {
        let mut image = solid(FRAME_WIDTH, FRAME_HEIGHT, 0);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));
        image.put_pixel(2, 0, Rgb([0, 0, 255]));
        image.put_pixel(3, 0, Rgb([200, 200, 200]));
        let gray = Frame::from_rgb(image).luma();
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
        assert_eq!(gray.get_pixel(3, 0).0[0], 200);
    }

    #[test]
    fn slot_keeps_only_the_latest_frame() {
        let slot = LatestFrameSlot::new();
        for value in [10u8, 20, 30] {
            assert!(slot.publish(Frame::from_rgb(solid(8, 8, value))).unwrap());
        }
        let frame = slot.take().unwrap().expect("frame");
        assert_eq!(frame.image().get_pixel(0, 0).0, [30, 30, 30]);
        assert_eq!(slot.replaced(), 2);
    }

    #[test]
    fn closed_slot_drains_then_reports_end() {
        let slot = LatestFrameSlot::new();
        slot.publish(Frame::from_rgb(solid(8, 8, 1))).unwrap();
        slot.close();
        assert!(!slot.publish(Frame::from_rgb(solid(8, 8, 2))).unwrap());
        assert!(slot.take().unwrap().is_some());
        assert!(slot.take().unwrap().is_none());
    }

    #[test]
    fn producer_error_surfaces_to_consumer() {
        let slot = LatestFrameSlot::new();
        assert!(!slot.has_failed());
        slot.close_with_error("camera gone".to_string());
        assert!(slot.has_failed());
        let err = slot.take().unwrap_err();
        assert!(err.to_string().contains("camera gone"));
        // the failure does not decay into a clean end of stream
        assert!(slot.take().is_err());
    }

    #[test]
    fn take_blocks_until_publish() {
        let slot = Arc::new(LatestFrameSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(20));
                slot.publish(Frame::from_rgb(solid(8, 8, 42))).unwrap();
            })
        };
        let frame = slot.take().unwrap().expect("frame");
        assert_eq!(frame.image().get_pixel(0, 0).0, [42, 42, 42]);
        producer.join().unwrap();
    }
}
