//! Temporal debounce and alert gate.
//!
//! A detection only becomes an alert once it has been seen on
//! `stable_frames` consecutive frames. After firing, the tracker stays
//! silent until a clean frame re-arms it and the cooldown has elapsed.

use std::time::{Duration, Instant};

use crate::config::AlertSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    /// No detection on the last frame, not alerted.
    Idle,
    /// Detections on consecutive frames, no alert yet for this run.
    Accumulating,
    /// An alert has fired for the current run of detections.
    Alerted,
}

/// Debounce counter plus cooldown anchor for one session.
#[derive(Clone, Debug)]
pub struct StabilityTracker {
    stable_frames: u32,
    cooldown: Duration,
    reset_clears_cooldown: bool,
    consecutive: u32,
    alert_sent: bool,
    last_alert: Option<Instant>,
}

impl StabilityTracker {
    pub fn new(settings: &AlertSettings) -> Self {
        Self {
            stable_frames: settings.stable_frames,
            cooldown: settings.cooldown,
            reset_clears_cooldown: settings.reset_clears_cooldown,
            consecutive: 0,
            alert_sent: false,
            last_alert: None,
        }
    }

    /// Feed one frame's candidate count. Returns `true` when an alert fires.
    pub fn observe(&mut self, count: usize, now: Instant) -> bool {
        if count == 0 {
            self.consecutive = 0;
            self.alert_sent = false;
            if self.reset_clears_cooldown {
                self.last_alert = None;
            }
            return false;
        }

        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive < self.stable_frames || self.alert_sent {
            return false;
        }
        let cooled_down = match self.last_alert {
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
            None => true,
        };
        if !cooled_down {
            return false;
        }

        self.alert_sent = true;
        self.last_alert = Some(now);
        true
    }

    pub fn state(&self) -> TrackerState {
        if self.alert_sent {
            TrackerState::Alerted
        } else if self.consecutive > 0 {
            TrackerState::Accumulating
        } else {
            TrackerState::Idle
        }
    }

    /// Consecutive frames with at least one candidate.
    pub fn counter(&self) -> u32 {
        self.consecutive
    }

    pub fn stable_frames(&self) -> u32 {
        self.stable_frames
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }
}
