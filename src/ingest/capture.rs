//! Background capture thread.
//!
//! `ThreadedCapture` moves a source onto its own thread and hands frames to
//! the pipeline through a `LatestFrameSlot`, so a slow detector drops stale
//! frames instead of falling behind the camera. Transient read failures are
//! retried on the capture thread under a `RetryPolicy`.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::retry::{ReadOutcome, RetryPolicy, SourceExhausted};
use super::{FrameSource, SourceStats};
use crate::config::RetrySettings;
use crate::frame::{Frame, LatestFrameSlot};

/// How long release waits for the capture thread before detaching it.
const JOIN_GRACE: Duration = Duration::from_secs(1);

pub struct ThreadedCapture {
    source: Option<Box<dyn FrameSource>>,
    source_name: String,
    retry: RetrySettings,
    slot: Arc<LatestFrameSlot>,
    stop: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedCapture {
    pub fn new(source: Box<dyn FrameSource>, retry: RetrySettings) -> Self {
        let source_name = source.stats().source;
        Self {
            source: Some(source),
            source_name,
            retry,
            slot: Arc::new(LatestFrameSlot::new()),
            stop: Arc::new(AtomicBool::new(false)),
            frames_captured: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// Frames the capture thread overwrote before the pipeline took them.
    pub fn dropped_frames(&self) -> u64 {
        self.slot.replaced()
    }

    /// Signal the capture thread and wait up to `JOIN_GRACE` for it.
    ///
    /// A thread stuck in a blocking read is detached; it exits on its own
    /// once the read returns and it sees the stop flag.
    fn stop_worker(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.slot.close();
        let Some(worker) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + JOIN_GRACE;
        while !worker.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        if !worker.is_finished() {
            log::warn!(
                "capture thread for {} is blocked in a read; detaching it",
                self.source_name
            );
            return;
        }
        if worker.join().is_err() {
            log::error!("capture thread for {} panicked", self.source_name);
        }
    }
}

impl FrameSource for ThreadedCapture {
    fn connect(&mut self) -> Result<()> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("capture thread already started"))?;
        source.connect()?;

        let slot = self.slot.clone();
        let stop = self.stop.clone();
        let frames_captured = self.frames_captured.clone();
        let retry = RetryPolicy::new(&self.retry);
        let worker = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture_loop(source, retry, slot, stop, frames_captured))?;
        self.worker = Some(worker);
        log::info!("ThreadedCapture: capturing {} in background", self.source_name);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.worker.is_none() {
            return Err(anyhow!("capture thread not started; call connect() first"));
        }
        match self.slot.take() {
            Err(err) if self.slot.has_failed() => Err(err.context(SourceExhausted)),
            other => other,
        }
    }

    fn is_healthy(&self) -> bool {
        self.worker.is_some() && !self.slot.is_closed()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            source: self.source_name.clone(),
        }
    }

    fn release(&mut self) {
        self.stop_worker();
        if let Some(source) = self.source.as_mut() {
            source.release();
        }
    }
}

impl Drop for ThreadedCapture {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    mut retry: RetryPolicy,
    slot: Arc<LatestFrameSlot>,
    stop: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
) {
    while !stop.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                retry.record_success();
                frames_captured.fetch_add(1, Ordering::Relaxed);
                match slot.publish(frame) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        log::error!("capture handoff failed: {}", err);
                        break;
                    }
                }
            }
            Ok(None) => {
                log::info!("capture source ended");
                slot.close();
                break;
            }
            Err(err) => match retry.record_failure() {
                ReadOutcome::RetryAfter(delay) => {
                    log::warn!(
                        "frame read failed ({} in a row), retrying in {:?}: {}",
                        retry.consecutive_failures(),
                        delay,
                        err
                    );
                    std::thread::sleep(delay);
                }
                ReadOutcome::GiveUp => {
                    slot.close_with_error(format!(
                        "giving up after {} consecutive read failures: {}",
                        retry.consecutive_failures(),
                        err
                    ));
                    break;
                }
            },
        }
    }
    source.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::synthetic::SyntheticSource;
    use std::time::Duration;

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Err(anyhow!("read failed"))
        }

        fn is_healthy(&self) -> bool {
            false
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                source: "failing".to_string(),
            }
        }
    }

    fn fast_retry(max: u32) -> RetrySettings {
        RetrySettings {
            max_consecutive_failures: max,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn delivers_frames_from_background_thread() {
        let source = SyntheticSource::new("threaded", Some(Duration::from_millis(5)));
        let mut capture = ThreadedCapture::new(Box::new(source), fast_retry(3));
        assert!(capture.next_frame().is_err());
        capture.connect().unwrap();
        for _ in 0..3 {
            let frame = capture.next_frame().unwrap().expect("frame");
            assert_eq!(frame.width(), 640);
        }
        assert!(capture.stats().frames_captured >= 3);
        assert_eq!(capture.stats().source, "stub://threaded");
        capture.release();
        assert!(!capture.is_healthy());
    }

    /// Blocks in `next_frame` until the test drops the sender.
    struct StalledSource {
        unblock: std::sync::mpsc::Receiver<()>,
    }

    impl FrameSource for StalledSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let _ = self.unblock.recv();
            Err(anyhow!("stalled read interrupted"))
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                source: "stalled".to_string(),
            }
        }
    }

    #[test]
    fn persistent_failures_are_terminal() {
        let mut capture = ThreadedCapture::new(Box::new(FailingSource), fast_retry(2));
        capture.connect().unwrap();
        let err = capture.next_frame().unwrap_err();
        assert!(crate::ingest::is_exhausted(&err));
        assert!(format!("{:#}", err).contains("giving up"));
        let again = capture.next_frame().unwrap_err();
        assert!(crate::ingest::is_exhausted(&again));
        assert!(!capture.is_healthy());
    }

    #[test]
    fn release_does_not_wait_on_a_stalled_read() {
        let (unblock_tx, unblock_rx) = std::sync::mpsc::channel::<()>();
        let source = StalledSource { unblock: unblock_rx };
        let mut capture = ThreadedCapture::new(Box::new(source), fast_retry(2));
        capture.connect().unwrap();

        let started = Instant::now();
        capture.release();
        let waited = started.elapsed();
        assert!(waited >= JOIN_GRACE);
        assert!(waited < JOIN_GRACE + Duration::from_secs(2));
        assert!(!capture.is_healthy());

        drop(unblock_tx);
    }
}
