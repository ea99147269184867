//! Alert artifacts: an annotated snapshot plus one appended log line.
//!
//! Persistence is best effort. A failed write is logged and reported on the
//! returned `AlertEvent`, but never undoes the tracker transition that fired
//! the alert.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::AlertSettings;

const ARTIFACT_JPEG_QUALITY: u8 = 95;

/// A fired alert.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertEvent {
    pub count: usize,
    pub timestamp: DateTime<Local>,
    /// Snapshot path; `None` when the snapshot could not be written.
    pub artifact_path: Option<PathBuf>,
}

pub struct AlertSink {
    detections_dir: PathBuf,
    log_path: PathBuf,
}

impl AlertSink {
    pub fn new(settings: &AlertSettings) -> Self {
        Self {
            detections_dir: settings.detections_dir.clone(),
            log_path: settings.log_path.clone(),
        }
    }

    /// Persist the annotated frame and the log line for `count` impurities.
    pub fn record(&self, count: usize, annotated: &RgbImage, at: DateTime<Local>) -> AlertEvent {
        log::warn!("ALERT: {} impurities detected", count);

        let artifact_path = match self.write_snapshot(annotated, &at) {
            Ok(path) => {
                log::info!("alert snapshot saved to {}", path.display());
                Some(path)
            }
            Err(err) => {
                log::error!("failed to save alert snapshot: {:#}", err);
                None
            }
        };
        if let Err(err) = self.append_log_line(count, &at) {
            log::error!(
                "failed to append alert to {}: {:#}",
                self.log_path.display(),
                err
            );
        }

        AlertEvent {
            count,
            timestamp: at,
            artifact_path,
        }
    }

    fn write_snapshot(&self, annotated: &RgbImage, at: &DateTime<Local>) -> Result<PathBuf> {
        fs::create_dir_all(&self.detections_dir)
            .with_context(|| format!("create {}", self.detections_dir.display()))?;
        let path = self.detections_dir.join(artifact_file_name(at));
        let file = fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, ARTIFACT_JPEG_QUALITY)
            .encode_image(annotated)
            .context("encode alert snapshot")?;
        writer.flush()?;
        Ok(path)
    }

    fn append_log_line(&self, count: usize, at: &DateTime<Local>) -> Result<()> {
        if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", log_line(count, at))?;
        Ok(())
    }

    pub fn detections_dir(&self) -> &Path {
        &self.detections_dir
    }
}

fn artifact_file_name(at: &DateTime<Local>) -> String {
    format!("impurity_alert_{}.jpg", at.format("%Y%m%d_%H%M%S"))
}

fn log_line(count: usize, at: &DateTime<Local>) -> String {
    format!(
        "{} - ALERT - {} impurities detected",
        at.format("%Y-%m-%d %H:%M:%S"),
        count
    )
}
