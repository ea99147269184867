use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SOURCE_URL: &str = "stub://rice_line";
const DEFAULT_STABLE_FRAMES: u32 = 3;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_DETECTIONS_DIR: &str = "detections";
const DEFAULT_ALERT_LOG: &str = "impurity_log.txt";
const DEFAULT_FRAME_INTERVAL_MS: u64 = 200;
const DEFAULT_JPEG_QUALITY: u8 = 70;
const DEFAULT_MAX_READ_FAILURES: u32 = 20;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct InspectorConfigFile {
    source: Option<SourceConfigFile>,
    thresholds: Option<Thresholds>,
    alert: Option<AlertConfigFile>,
    stream: Option<StreamConfigFile>,
    retry: Option<RetryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    loop_files: Option<bool>,
    threaded_capture: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    stable_frames: Option<u32>,
    cooldown_secs: Option<u64>,
    reset_clears_cooldown: Option<bool>,
    detections_dir: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    frame_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    max_consecutive_failures: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct InspectorConfig {
    pub source: SourceSettings,
    pub thresholds: Thresholds,
    pub alert: AlertSettings,
    pub stream: StreamSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `stub://name`, `http(s)://host/path` or a local file/directory path.
    pub url: String,
    /// Replay a file source from the start once it runs out.
    pub loop_files: bool,
    /// Capture on a worker thread with a latest-frame-wins handoff.
    pub threaded_capture: bool,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub stable_frames: u32,
    pub cooldown: Duration,
    /// A clean frame also drops the cooldown anchor, so a detect/clear/detect
    /// cycle can re-alert inside the cooldown window.
    pub reset_clears_cooldown: bool,
    pub detections_dir: PathBuf,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Minimum spacing between two `FRAME:` records.
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_consecutive_failures: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

/// Named segmentation, filtering and scoring thresholds.
///
/// Every magic number of the detector lives here so that deployments and
/// tests can override them without touching control flow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Side fraction of the centered calibration window.
    pub calibration_region: f64,

    /// Global cue: pixels at or below `background - darkness_offset`.
    pub darkness_offset: f64,
    /// Local cue: odd block size of the Gaussian neighborhood.
    pub adaptive_block_size: u32,
    /// Local cue: pixels at or below `local_mean - adaptive_bias`.
    pub adaptive_bias: i16,
    /// Color cue: HSV value (max channel) at or below this.
    pub value_max: u8,
    pub canny_low: f32,
    pub canny_high: f32,
    pub edge_dilate_passes: u8,
    pub open_passes: u8,
    pub close_passes: u8,

    pub min_area: f64,
    pub max_area: f64,
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub min_darkness_diff: f64,
    pub min_confidence: u8,

    pub dark_strong_diff: f64,
    pub dark_strong_points: u8,
    pub dark_medium_diff: f64,
    pub dark_medium_points: u8,
    pub dark_weak_diff: f64,
    pub dark_weak_points: u8,
    pub area_band_min: f64,
    pub area_band_max: f64,
    pub area_band_points: u8,
    pub area_outside_points: u8,
    pub circularity_min: f64,
    pub circularity_max: f64,
    pub circularity_points: u8,
    pub circularity_outside_points: u8,
    pub solidity_min: f64,
    pub solidity_points: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            calibration_region: 0.5,
            darkness_offset: 30.0,
            adaptive_block_size: 15,
            adaptive_bias: 5,
            value_max: 100,
            canny_low: 30.0,
            canny_high: 100.0,
            edge_dilate_passes: 2,
            open_passes: 1,
            close_passes: 2,
            min_area: 100.0,
            max_area: 20_000.0,
            min_aspect: 0.2,
            max_aspect: 5.0,
            min_darkness_diff: 10.0,
            min_confidence: 40,
            dark_strong_diff: 30.0,
            dark_strong_points: 35,
            dark_medium_diff: 20.0,
            dark_medium_points: 25,
            dark_weak_diff: 10.0,
            dark_weak_points: 15,
            area_band_min: 150.0,
            area_band_max: 10_000.0,
            area_band_points: 25,
            area_outside_points: 10,
            circularity_min: 0.2,
            circularity_max: 1.0,
            circularity_points: 20,
            circularity_outside_points: 10,
            solidity_min: 0.5,
            solidity_points: 10,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        if !(self.calibration_region > 0.0 && self.calibration_region <= 1.0) {
            return Err(anyhow!("calibration_region must be in (0, 1]"));
        }
        if self.adaptive_block_size < 3 || self.adaptive_block_size % 2 == 0 {
            return Err(anyhow!("adaptive_block_size must be odd and >= 3"));
        }
        if self.canny_low > self.canny_high {
            return Err(anyhow!("canny_low must not exceed canny_high"));
        }
        if self.min_area >= self.max_area {
            return Err(anyhow!("min_area must be below max_area"));
        }
        if self.min_aspect <= 0.0 || self.min_aspect >= self.max_aspect {
            return Err(anyhow!("aspect range must be positive and non-empty"));
        }
        if self.area_band_min > self.area_band_max {
            return Err(anyhow!("area scoring band is inverted"));
        }
        if self.circularity_min > self.circularity_max {
            return Err(anyhow!("circularity scoring band is inverted"));
        }
        if !(self.dark_strong_diff >= self.dark_medium_diff
            && self.dark_medium_diff >= self.dark_weak_diff)
        {
            return Err(anyhow!("darkness tiers must be ordered strong >= medium >= weak"));
        }
        if self.min_confidence > 100 {
            return Err(anyhow!("min_confidence must be <= 100"));
        }
        Ok(())
    }
}

impl Default for InspectorConfig {
    fn default() -> Self {
        // An empty file section set only picks up named defaults.
        Self::from_file(InspectorConfigFile::default())
    }
}

impl InspectorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("IMPURITY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InspectorConfigFile) -> Self {
        let source = SourceSettings {
            url: file
                .source
                .as_ref()
                .and_then(|source| source.url.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            loop_files: file
                .source
                .as_ref()
                .and_then(|source| source.loop_files)
                .unwrap_or(false),
            threaded_capture: file
                .source
                .and_then(|source| source.threaded_capture)
                .unwrap_or(false),
        };
        let alert = AlertSettings {
            stable_frames: file
                .alert
                .as_ref()
                .and_then(|alert| alert.stable_frames)
                .unwrap_or(DEFAULT_STABLE_FRAMES),
            cooldown: Duration::from_secs(
                file.alert
                    .as_ref()
                    .and_then(|alert| alert.cooldown_secs)
                    .unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
            reset_clears_cooldown: file
                .alert
                .as_ref()
                .and_then(|alert| alert.reset_clears_cooldown)
                .unwrap_or(true),
            detections_dir: file
                .alert
                .as_ref()
                .and_then(|alert| alert.detections_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTIONS_DIR)),
            log_path: file
                .alert
                .and_then(|alert| alert.log_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ALERT_LOG)),
        };
        let stream = StreamSettings {
            frame_interval: Duration::from_millis(
                file.stream
                    .as_ref()
                    .and_then(|stream| stream.frame_interval_ms)
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            jpeg_quality: file
                .stream
                .and_then(|stream| stream.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        let retry = RetrySettings {
            max_consecutive_failures: file
                .retry
                .as_ref()
                .and_then(|retry| retry.max_consecutive_failures)
                .unwrap_or(DEFAULT_MAX_READ_FAILURES),
            initial_backoff: Duration::from_millis(
                file.retry
                    .as_ref()
                    .and_then(|retry| retry.initial_backoff_ms)
                    .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
            ),
            max_backoff: Duration::from_millis(
                file.retry
                    .and_then(|retry| retry.max_backoff_ms)
                    .unwrap_or(DEFAULT_MAX_BACKOFF_MS),
            ),
        };
        Self {
            source,
            thresholds: file.thresholds.unwrap_or_default(),
            alert,
            stream,
            retry,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("IMPURITY_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(dir) = std::env::var("IMPURITY_DETECTIONS_DIR") {
            if !dir.trim().is_empty() {
                self.alert.detections_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("IMPURITY_ALERT_LOG") {
            if !path.trim().is_empty() {
                self.alert.log_path = PathBuf::from(path);
            }
        }
        if let Ok(frames) = std::env::var("IMPURITY_STABLE_FRAMES") {
            self.alert.stable_frames = frames
                .parse()
                .map_err(|_| anyhow!("IMPURITY_STABLE_FRAMES must be a positive integer"))?;
        }
        if let Ok(cooldown) = std::env::var("IMPURITY_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("IMPURITY_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(interval) = std::env::var("IMPURITY_FRAME_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                anyhow!("IMPURITY_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.stream.frame_interval = Duration::from_millis(millis);
        }
        if let Ok(quality) = std::env::var("IMPURITY_JPEG_QUALITY") {
            self.stream.jpeg_quality = quality
                .parse()
                .map_err(|_| anyhow!("IMPURITY_JPEG_QUALITY must be an integer in 1..=100"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.alert.stable_frames == 0 {
            return Err(anyhow!("stable_frames must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(anyhow!("initial_backoff must not exceed max_backoff"));
        }
        self.thresholds.validate()
    }
}

fn read_config_file(path: &Path) -> Result<InspectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_named_constants() {
        let cfg = InspectorConfig::default();
        assert_eq!(cfg.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(cfg.alert.stable_frames, 3);
        assert_eq!(cfg.alert.cooldown, Duration::from_secs(10));
        assert!(cfg.alert.reset_clears_cooldown);
        assert_eq!(cfg.stream.frame_interval, Duration::from_millis(200));
        assert_eq!(cfg.stream.jpeg_quality, 70);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_threshold_table_keeps_other_defaults() {
        let file: InspectorConfigFile =
            serde_json::from_str(r#"{"thresholds": {"min_area": 50.0, "value_max": 80}}"#)
                .unwrap();
        let cfg = InspectorConfig::from_file(file);
        assert_eq!(cfg.thresholds.min_area, 50.0);
        assert_eq!(cfg.thresholds.value_max, 80);
        assert_eq!(cfg.thresholds.max_area, 20_000.0);
        assert_eq!(cfg.thresholds.min_confidence, 40);
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let mut thresholds = Thresholds::default();
        thresholds.min_area = 30_000.0;
        assert!(thresholds.validate().is_err());

        let mut thresholds = Thresholds::default();
        thresholds.adaptive_block_size = 14;
        assert!(thresholds.validate().is_err());

        let mut cfg = InspectorConfig::default();
        cfg.alert.stable_frames = 0;
        assert!(cfg.validate().is_err());
    }
}
