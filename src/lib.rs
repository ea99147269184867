//! Impurity Watch
//!
//! This crate implements a visual inspection pipeline that watches a stream
//! of bright granular product (rice, grain) and flags dark foreign objects
//! such as stones.
//!
//! # Architecture
//!
//! Frames flow forward through five stages:
//!
//! 1. **Calibration**: the background profile is measured once per session
//!    (and again on request) from the centered half of a frame.
//! 2. **Segmentation**: global darkness, local adaptive darkness and HSV value
//!    cues are OR-ed, gated by dilated edges, then morphologically cleaned.
//! 3. **Extraction**: outer contours are filtered on area, aspect and
//!    darkness, then scored for confidence.
//! 4. **Stability**: detections must persist for several frames before an
//!    alert fires; alerts are rate limited by a cooldown.
//! 5. **Telemetry**: `DATA:` records every frame and rate-limited `FRAME:`
//!    snapshots go to stdout; alerts are persisted as a JPEG plus a log line.
//!
//! # Module Structure
//!
//! - `frame`: working-size frames and the latest-frame handoff slot
//! - `ingest`: frame sources (synthetic, HTTP MJPEG, local images)
//! - `detect`: calibration, segmentation, candidate extraction and scoring
//! - `tracker`, `alert`: debounce gate and alert artifacts
//! - `annotate`, `telemetry`: overlay and stdout protocol
//! - `control`, `pipeline`: operator commands and the session loop

pub mod alert;
pub mod annotate;
pub mod config;
pub mod control;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod telemetry;
pub mod tracker;

pub use alert::{AlertEvent, AlertSink};
pub use config::{InspectorConfig, Thresholds};
pub use control::ControlCommand;
pub use detect::{
    BackgroundProfile, BoundingBox, Candidate, CandidateScorer, FrameAnalysis, HeuristicScorer,
    ImpurityDetector, ShapeFeatures,
};
pub use frame::{Frame, LatestFrameSlot, FRAME_HEIGHT, FRAME_WIDTH};
#[cfg(feature = "ingest-http")]
pub use ingest::HttpSource;
pub use ingest::{
    FileSource, FrameSource, RetryPolicy, SourceExhausted, SourceOptions, SourceStats,
    SyntheticSource, ThreadedCapture, VideoSource,
};
pub use pipeline::{FrameOutcome, Pipeline, Session, SessionEnd, SessionSummary};
pub use telemetry::{quality_score, DetectionReport, Status, TelemetryRecord, TelemetryStreamer};
pub use tracker::{StabilityTracker, TrackerState};
