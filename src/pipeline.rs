//! Per-frame orchestration and the session loop.
//!
//! Each frame runs, in order: calibration (first frame or after a
//! recalibration request), detection, the stability tracker, the FPS meter,
//! annotation, telemetry and, when the tracker fires, alert persistence.
//! One frame is fully processed before the next is read.

use anyhow::Result;
use chrono::Local;
use image::RgbImage;
use std::io::Write;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use crate::alert::{AlertEvent, AlertSink};
use crate::annotate::annotate;
use crate::config::{AlertSettings, InspectorConfig, RetrySettings};
use crate::control::ControlCommand;
use crate::detect::{BackgroundProfile, ImpurityDetector};
use crate::frame::Frame;
use crate::ingest::{is_exhausted, FrameSource, ReadOutcome, RetryPolicy};
use crate::telemetry::{DetectionReport, FpsMeter, TelemetryStreamer};
use crate::tracker::StabilityTracker;

/// Mutable state of one inspection session.
#[derive(Clone, Debug)]
pub struct Session {
    profile: Option<BackgroundProfile>,
    tracker: StabilityTracker,
    recalibrate_requested: bool,
}

impl Session {
    pub fn new(alert: &AlertSettings) -> Self {
        Self {
            profile: None,
            tracker: StabilityTracker::new(alert),
            recalibrate_requested: false,
        }
    }

    pub fn profile(&self) -> Option<&BackgroundProfile> {
        self.profile.as_ref()
    }

    /// Recalibrate from the next processed frame.
    pub fn request_recalibration(&mut self) {
        self.recalibrate_requested = true;
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }
}

/// Everything produced for one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    pub report: DetectionReport,
    pub annotated: RgbImage,
    /// Set when this frame calibrated the background.
    pub calibrated: Option<BackgroundProfile>,
    pub alert: Option<AlertEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Terminated,
    EndOfStream,
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub frames_processed: u64,
    pub frames_streamed: u64,
    pub alerts: u64,
}

pub struct Pipeline<W: Write> {
    detector: ImpurityDetector,
    session: Session,
    fps: FpsMeter,
    streamer: TelemetryStreamer<W>,
    alerts: AlertSink,
    retry: RetrySettings,
    frames_processed: u64,
    alerts_fired: u64,
}

impl<W: Write> Pipeline<W> {
    /// Pipeline with the heuristic detector, writing telemetry to `out`.
    pub fn new(config: &InspectorConfig, out: W) -> Self {
        Self::with_detector(ImpurityDetector::new(config.thresholds.clone()), config, out)
    }

    pub fn with_detector(detector: ImpurityDetector, config: &InspectorConfig, out: W) -> Self {
        Self {
            detector,
            session: Session::new(&config.alert),
            fps: FpsMeter::new(Instant::now()),
            streamer: TelemetryStreamer::new(out, &config.stream),
            alerts: AlertSink::new(&config.alert),
            retry: config.retry.clone(),
            frames_processed: 0,
            alerts_fired: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn streamer(&self) -> &TelemetryStreamer<W> {
        &self.streamer
    }

    pub fn into_output(self) -> W {
        self.streamer.into_inner()
    }

    /// Apply an operator command. Returns `false` when the session should end.
    pub fn handle_command(&mut self, command: ControlCommand) -> bool {
        match command {
            ControlCommand::Terminate => {
                log::info!("terminate requested");
                false
            }
            ControlCommand::Recalibrate => {
                log::info!("recalibrating background on next frame");
                self.session.request_recalibration();
                true
            }
        }
    }

    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> FrameOutcome {
        let (profile, calibrated) = match self.session.profile {
            Some(profile) if !self.session.recalibrate_requested => (profile, None),
            _ => {
                let profile = self.detector.calibrate(frame);
                log::info!(
                    "background calibrated: avg intensity {:.1}",
                    profile.mean_intensity
                );
                self.session.profile = Some(profile);
                self.session.recalibrate_requested = false;
                (profile, Some(profile))
            }
        };

        let candidates = self.detector.analyze(frame, &profile).candidates;
        let count = candidates.len();
        let fire = self.session.tracker.observe(count, now);
        let fps = self.fps.tick(now);

        let report = DetectionReport::new(
            candidates,
            self.session.tracker.counter(),
            self.session.tracker.stable_frames(),
            profile.mean_intensity,
            fps,
            Local::now(),
        );
        let annotated = annotate(frame, &report);
        self.streamer.publish(&report, &annotated, now);

        let alert = if fire {
            self.alerts_fired += 1;
            Some(self.alerts.record(count, &annotated, report.timestamp))
        } else {
            None
        };
        self.frames_processed += 1;

        FrameOutcome {
            report,
            annotated,
            calibrated,
            alert,
        }
    }

    /// Read and process frames until terminated or the stream ends.
    ///
    /// `source` must already be connected. It is released on every exit
    /// path, including read failures past the retry bound.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        commands: &Receiver<ControlCommand>,
    ) -> Result<SessionSummary> {
        let result = self.run_loop(source, commands);
        source.release();

        let stats = source.stats();
        match &result {
            Ok(summary) => log::info!(
                "session ended ({:?}): {} frames processed, {} streamed, {} alerts, {} captured from {}",
                summary.end,
                summary.frames_processed,
                summary.frames_streamed,
                summary.alerts,
                stats.frames_captured,
                stats.source
            ),
            Err(err) => log::error!(
                "session failed after {} frames from {}: {:#}",
                self.frames_processed,
                stats.source,
                err
            ),
        }
        result
    }

    fn run_loop(
        &mut self,
        source: &mut dyn FrameSource,
        commands: &Receiver<ControlCommand>,
    ) -> Result<SessionSummary> {
        let mut retry = RetryPolicy::new(&self.retry);
        loop {
            let pending: Vec<ControlCommand> = commands.try_iter().collect();
            for command in pending {
                if !self.handle_command(command) {
                    return Ok(self.summary(SessionEnd::Terminated));
                }
            }

            match source.next_frame() {
                Ok(Some(frame)) => {
                    retry.record_success();
                    self.process_frame(&frame, Instant::now());
                }
                Ok(None) => return Ok(self.summary(SessionEnd::EndOfStream)),
                Err(err) if is_exhausted(&err) => return Err(err),
                Err(err) => match retry.record_failure() {
                    ReadOutcome::RetryAfter(delay) => {
                        log::warn!(
                            "frame read failed ({} in a row), retrying in {:?}: {:#}",
                            retry.consecutive_failures(),
                            delay,
                            err
                        );
                        std::thread::sleep(delay);
                    }
                    ReadOutcome::GiveUp => {
                        return Err(err.context(format!(
                            "giving up after {} consecutive frame read failures",
                            retry.consecutive_failures()
                        )));
                    }
                },
            }
        }
    }

    fn summary(&self, end: SessionEnd) -> SessionSummary {
        SessionSummary {
            end,
            frames_processed: self.frames_processed,
            frames_streamed: self.streamer.frames_sent(),
            alerts: self.alerts_fired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::synthetic::{render_scene, Stone};
    use crate::ingest::{SourceStats, ThreadedCapture};
    use std::collections::VecDeque;
    use std::time::Duration;

    fn config(root: &std::path::Path) -> InspectorConfig {
        let mut config = InspectorConfig::default();
        config.alert.detections_dir = root.join("detections");
        config.alert.log_path = root.join("impurity_log.txt");
        config.retry.initial_backoff = Duration::from_millis(1);
        config.retry.max_backoff = Duration::from_millis(1);
        config.retry.max_consecutive_failures = 2;
        config
    }

    /// Replays a fixed script of read results.
    struct ScriptedSource {
        script: VecDeque<Result<Option<Frame>>>,
        released: bool,
    }

    impl FrameSource for ScriptedSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }

        fn is_healthy(&self) -> bool {
            !self.released
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                source: "scripted".to_string(),
            }
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    fn clean() -> Frame {
        Frame::from_rgb(render_scene(5, &[]))
    }

    fn dirty() -> Frame {
        Frame::from_rgb(render_scene(5, &[Stone::square(320, 300, 24)]))
    }

    #[test]
    fn first_frame_calibrates_and_recalibration_is_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
        assert!(pipeline.session().profile().is_none());

        let now = Instant::now();
        let first = pipeline.process_frame(&clean(), now);
        assert!(first.calibrated.is_some());
        assert!(first.report.background_intensity > 150.0);

        assert!(pipeline
            .process_frame(&clean(), now + Duration::from_millis(10))
            .calibrated
            .is_none());
        assert!(pipeline.handle_command(ControlCommand::Recalibrate));
        assert!(pipeline
            .process_frame(&clean(), now + Duration::from_millis(20))
            .calibrated
            .is_some());
        assert!(!pipeline.handle_command(ControlCommand::Terminate));
    }

    #[test]
    fn stable_detection_fires_one_alert_with_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
        let start = Instant::now();
        pipeline.process_frame(&clean(), start);

        let mut alerts = Vec::new();
        for i in 1..=5 {
            let outcome = pipeline.process_frame(&dirty(), start + Duration::from_millis(10 * i));
            assert_eq!(outcome.report.count(), 1);
            if let Some(alert) = outcome.alert {
                alerts.push((i, alert));
            }
        }
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, 3);
        let path = alerts[0].1.artifact_path.clone().expect("snapshot");
        assert!(path.exists());
    }

    #[test]
    fn run_releases_source_after_retry_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
        let mut source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Some(clean())),
                Err(anyhow::anyhow!("timeout")),
                Err(anyhow::anyhow!("timeout")),
                Err(anyhow::anyhow!("timeout")),
            ]),
            released: false,
        };
        let (_tx, rx) = crate::control::channel();
        let err = pipeline.run(&mut source, &rx).unwrap_err();
        assert!(format!("{:#}", err).contains("giving up"));
        assert!(source.released);
    }

    #[test]
    fn threaded_capture_give_up_fails_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        // Generous session-level budget: it must not be spent again.
        cfg.retry.max_consecutive_failures = 50;
        cfg.retry.initial_backoff = Duration::from_secs(1);
        cfg.retry.max_backoff = Duration::from_secs(1);
        let mut pipeline = Pipeline::new(&cfg, Vec::new());

        let dead_camera = ScriptedSource {
            script: (0..10).map(|_| Err(anyhow::anyhow!("no route to camera"))).collect(),
            released: false,
        };
        let capture_retry = RetrySettings {
            max_consecutive_failures: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let mut capture = ThreadedCapture::new(Box::new(dead_camera), capture_retry);
        capture.connect().unwrap();

        let (_tx, rx) = crate::control::channel();
        let started = Instant::now();
        let err = pipeline.run(&mut capture, &rx).unwrap_err();
        assert!(is_exhausted(&err));
        assert!(format!("{:#}", err).contains("no route to camera"));
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(pipeline.frames_processed, 0);
        assert!(!capture.is_healthy());
    }

    #[test]
    fn run_stops_on_terminate_and_at_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crate::control::channel();

        let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
        let mut source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Some(clean())),
                Err(anyhow::anyhow!("glitch")),
                Ok(Some(clean())),
            ]),
            released: false,
        };
        let summary = pipeline.run(&mut source, &rx).unwrap();
        assert_eq!(summary.end, SessionEnd::EndOfStream);
        assert_eq!(summary.frames_processed, 2);
        assert!(source.released);

        tx.send(ControlCommand::Terminate).unwrap();
        let mut source = ScriptedSource {
            script: VecDeque::from(vec![Ok(Some(clean()))]),
            released: false,
        };
        let summary = pipeline.run(&mut source, &rx).unwrap();
        assert_eq!(summary.end, SessionEnd::Terminated);
        assert!(source.released);
    }
}
