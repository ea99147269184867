//! Line-oriented telemetry on stdout.
//!
//! Two record kinds share the stream, one per line:
//! - `DATA:<json>` after every processed frame
//! - `FRAME:<base64 jpeg>` of the annotated frame, rate limited
//!
//! Write failures are logged and swallowed; telemetry never stops the
//! pipeline.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::config::StreamSettings;
use crate::detect::Candidate;

const DATA_PREFIX: &str = "DATA:";
const FRAME_PREFIX: &str = "FRAME:";
const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Status {
    #[serde(rename = "CLEAN")]
    Clean,
    #[serde(rename = "CONTAMINATION DETECTED")]
    Contaminated,
}

impl Status {
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            Status::Clean
        } else {
            Status::Contaminated
        }
    }
}

/// `max(0, 100 - 10 * count)`.
pub fn quality_score(count: usize) -> u8 {
    100usize.saturating_sub(count.saturating_mul(10)) as u8
}

/// Per-frame summary handed to telemetry and annotation.
#[derive(Clone, Debug)]
pub struct DetectionReport {
    pub candidates: Vec<Candidate>,
    pub quality_score: u8,
    pub status: Status,
    pub stability_counter: u32,
    pub stable_frames: u32,
    /// Calibrated background mean; 0 before calibration.
    pub background_intensity: f64,
    pub fps: f64,
    pub timestamp: DateTime<Local>,
}

impl DetectionReport {
    pub fn new(
        candidates: Vec<Candidate>,
        stability_counter: u32,
        stable_frames: u32,
        background_intensity: f64,
        fps: f64,
        timestamp: DateTime<Local>,
    ) -> Self {
        let count = candidates.len();
        Self {
            candidates,
            quality_score: quality_score(count),
            status: Status::from_count(count),
            stability_counter,
            stable_frames,
            background_intensity,
            fps,
            timestamp,
        }
    }

    pub fn count(&self) -> usize {
        self.candidates.len()
    }
}

/// JSON body of a `DATA:` line.
#[derive(Debug, Serialize)]
pub struct TelemetryRecord {
    pub impurities_count: usize,
    pub quality_score: u8,
    pub status: Status,
    pub stability: u32,
    pub background_intensity: f64,
    pub timestamp: String,
    pub fps: f64,
    pub detections: Vec<DetectionSummary>,
}

#[derive(Debug, Serialize)]
pub struct DetectionSummary {
    pub confidence: u8,
    pub area: u64,
    pub darkness_diff: f64,
}

impl From<&DetectionReport> for TelemetryRecord {
    fn from(report: &DetectionReport) -> Self {
        Self {
            impurities_count: report.count(),
            quality_score: report.quality_score,
            status: report.status,
            stability: report.stability_counter,
            background_intensity: report.background_intensity,
            timestamp: report.timestamp.format("%H:%M:%S").to_string(),
            fps: (report.fps * 10.0).round() / 10.0,
            detections: report
                .candidates
                .iter()
                .map(|c| DetectionSummary {
                    confidence: c.confidence,
                    area: c.area as u64,
                    darkness_diff: c.darkness_diff,
                })
                .collect(),
        }
    }
}

/// Frames per second over a rolling one-second window.
#[derive(Clone, Debug)]
pub struct FpsMeter {
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl FpsMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0.0,
        }
    }

    /// Count one processed frame and return the current estimate.
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed > FPS_WINDOW {
            self.fps = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = now;
        }
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

/// Writes `FRAME:` and `DATA:` lines to `W`.
pub struct TelemetryStreamer<W: Write> {
    out: W,
    frame_interval: Duration,
    jpeg_quality: u8,
    last_frame_sent: Option<Instant>,
    frames_sent: u64,
    records_sent: u64,
}

impl<W: Write> TelemetryStreamer<W> {
    pub fn new(out: W, settings: &StreamSettings) -> Self {
        Self {
            out,
            frame_interval: settings.frame_interval,
            jpeg_quality: settings.jpeg_quality,
            last_frame_sent: None,
            frames_sent: 0,
            records_sent: 0,
        }
    }

    /// Emit this frame's telemetry: a `FRAME:` line when the interval has
    /// elapsed, then a `DATA:` line.
    pub fn publish(&mut self, report: &DetectionReport, annotated: &RgbImage, now: Instant) {
        let frame_due = self
            .last_frame_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= self.frame_interval);
        if frame_due {
            match self.write_frame(annotated) {
                Ok(()) => {
                    self.last_frame_sent = Some(now);
                    self.frames_sent += 1;
                }
                Err(err) => log::error!("failed to stream frame: {:#}", err),
            }
        }

        match self.write_data(&TelemetryRecord::from(report)) {
            Ok(()) => self.records_sent += 1,
            Err(err) => log::error!("failed to stream telemetry: {:#}", err),
        }
    }

    fn write_frame(&mut self, annotated: &RgbImage) -> Result<()> {
        let jpeg = encode_jpeg(annotated, self.jpeg_quality)?;
        writeln!(self.out, "{}{}", FRAME_PREFIX, STANDARD.encode(jpeg))?;
        self.out.flush()?;
        Ok(())
    }

    fn write_data(&mut self, record: &TelemetryRecord) -> Result<()> {
        let json = serde_json::to_string(record).context("serialize telemetry record")?;
        writeln!(self.out, "{}{}", DATA_PREFIX, json)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn records_sent(&self) -> u64 {
        self.records_sent
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .context("encode frame as jpeg")?;
    Ok(bytes)
}
