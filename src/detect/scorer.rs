use crate::config::Thresholds;

/// Photometric and shape measurements of one candidate region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeFeatures {
    pub area: f64,
    pub darkness_diff: f64,
    pub circularity: f64,
    pub solidity: f64,
}

/// Confidence scorer trait.
///
/// Scorers map the measurements of a region that already passed the
/// geometric and photometric filters to a confidence in `0..=100`.
/// The heuristic scorer is the reference; a learned scorer can replace it
/// without touching extraction.
pub trait CandidateScorer: Send {
    /// Scorer identifier (logged at startup).
    fn name(&self) -> &'static str;

    fn score(&self, features: &ShapeFeatures) -> u8;
}

/// Additive tier scorer driven by the threshold table.
///
/// With default thresholds the maximum is 90: darkness 35, area 25,
/// circularity 20, solidity 10.
#[derive(Clone, Debug, Default)]
pub struct HeuristicScorer {
    table: Thresholds,
}

impl HeuristicScorer {
    pub fn new(table: Thresholds) -> Self {
        Self { table }
    }
}

impl CandidateScorer for HeuristicScorer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn score(&self, f: &ShapeFeatures) -> u8 {
        let t = &self.table;
        let mut confidence: u32 = 0;

        if f.darkness_diff > t.dark_strong_diff {
            confidence += t.dark_strong_points as u32;
        } else if f.darkness_diff > t.dark_medium_diff {
            confidence += t.dark_medium_points as u32;
        } else if f.darkness_diff > t.dark_weak_diff {
            confidence += t.dark_weak_points as u32;
        }

        confidence += if (t.area_band_min..=t.area_band_max).contains(&f.area) {
            t.area_band_points as u32
        } else {
            t.area_outside_points as u32
        };

        confidence += if (t.circularity_min..=t.circularity_max).contains(&f.circularity) {
            t.circularity_points as u32
        } else {
            t.circularity_outside_points as u32
        };

        if f.solidity > t.solidity_min {
            confidence += t.solidity_points as u32;
        }

        confidence.min(100) as u8
    }
}
