//! Dark-contaminant detection: calibration, segmentation, extraction.
//!
//! `ImpurityDetector` is stateless per frame: for a fixed frame and
//! background profile, `analyze` always returns the same mask and the same
//! candidates in the same order.

mod calibrate;
mod candidate;
mod scorer;
mod segment;

pub use calibrate::{calibrate, BackgroundProfile};
pub use candidate::{extract, BoundingBox, Candidate};
pub use scorer::{CandidateScorer, HeuristicScorer, ShapeFeatures};
pub use segment::segment;

use image::GrayImage;

use crate::config::Thresholds;
use crate::frame::Frame;

/// Output of one detector pass.
#[derive(Clone, Debug)]
pub struct FrameAnalysis {
    /// Cleaned foreground mask (255 = foreground).
    pub mask: GrayImage,
    pub candidates: Vec<Candidate>,
}

pub struct ImpurityDetector {
    thresholds: Thresholds,
    scorer: Box<dyn CandidateScorer>,
}

impl ImpurityDetector {
    /// Detector with the heuristic scorer over `thresholds`.
    pub fn new(thresholds: Thresholds) -> Self {
        let scorer = HeuristicScorer::new(thresholds.clone());
        Self::with_scorer(thresholds, scorer)
    }

    pub fn with_scorer<S: CandidateScorer + 'static>(thresholds: Thresholds, scorer: S) -> Self {
        Self {
            thresholds,
            scorer: Box::new(scorer),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    pub fn calibrate(&self, frame: &Frame) -> BackgroundProfile {
        calibrate(frame, self.thresholds.calibration_region)
    }

    pub fn analyze(&self, frame: &Frame, profile: &BackgroundProfile) -> FrameAnalysis {
        let gray = frame.luma();
        let mask = segment(frame.image(), &gray, profile, &self.thresholds);
        let candidates = extract(
            &mask,
            &gray,
            profile,
            &self.thresholds,
            self.scorer.as_ref(),
        );
        FrameAnalysis { mask, candidates }
    }
}

impl Default for ImpurityDetector {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
