use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::geometry::{arc_length, convex_hull};
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Serialize;
use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::config::Thresholds;
use crate::detect::calibrate::BackgroundProfile;
use crate::detect::scorer::{CandidateScorer, ShapeFeatures};

/// Axis-aligned box in pixel coordinates; `w`/`h` count pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }
}

/// A scored foreign-object candidate. Lives for one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candidate {
    pub bounding_box: BoundingBox,
    pub area: f64,
    pub aspect_ratio: f64,
    pub mean_intensity: f64,
    pub darkness_diff: f64,
    pub circularity: f64,
    pub solidity: f64,
    pub confidence: u8,
}

/// Turn a cleaned mask into scored candidates, in contour discovery order.
///
/// Only outermost contours are considered. Regions are dropped, in order,
/// for area, aspect ratio, darkness, degenerate perimeter and finally
/// confidence below `min_confidence`.
pub fn extract(
    mask: &GrayImage,
    gray: &GrayImage,
    profile: &BackgroundProfile,
    thresholds: &Thresholds,
    scorer: &dyn CandidateScorer,
) -> Vec<Candidate> {
    let contours: Vec<Contour<i32>> = find_contours(mask);
    let mut labels = None;
    let mut candidates = Vec::new();

    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    {
        let points = &contour.points;
        if points.is_empty() {
            continue;
        }

        let area = polygon_area(points);
        if area < thresholds.min_area || area > thresholds.max_area {
            continue;
        }

        let bounding_box = bounding_box(points);
        let aspect_ratio = bounding_box.w as f64 / bounding_box.h as f64;
        if aspect_ratio < thresholds.min_aspect || aspect_ratio > thresholds.max_aspect {
            continue;
        }

        let component_labels = labels
            .get_or_insert_with(|| connected_components(mask, Connectivity::Eight, Luma([0u8])));
        let mean_intensity = filled_mean(gray, component_labels, points[0], &bounding_box);
        let darkness_diff = profile.mean_intensity - mean_intensity;
        if darkness_diff < thresholds.min_darkness_diff {
            continue;
        }

        let perimeter = arc_length(points, true);
        if perimeter <= 0.0 {
            log::trace!("skipping zero-perimeter region at {:?}", bounding_box);
            continue;
        }

        let circularity = 4.0 * PI * area / (perimeter * perimeter);
        let hull_area = polygon_area(&convex_hull(points.as_slice()));
        let solidity = if hull_area > 0.0 { area / hull_area } else { 0.0 };

        let confidence = scorer.score(&ShapeFeatures {
            area,
            darkness_diff,
            circularity,
            solidity,
        });
        if confidence < thresholds.min_confidence {
            continue;
        }

        candidates.push(Candidate {
            bounding_box,
            area,
            aspect_ratio,
            mean_intensity,
            darkness_diff,
            circularity,
            solidity,
            confidence,
        });
    }

    candidates
}

/// Shoelace area of a closed polygon through pixel centers.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

fn bounding_box(points: &[Point<i32>]) -> BoundingBox {
    let (mut min_x, mut min_y) = (i32::MAX, i32::MAX);
    let (mut max_x, mut max_y) = (i32::MIN, i32::MIN);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    BoundingBox {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        w: (max_x - min_x + 1) as u32,
        h: (max_y - min_y + 1) as u32,
    }
}

/// Mean gray level over the region enclosed by a contour, holes included.
///
/// The region is the 8-connected component that owns `seed`, plus every
/// pixel of its box that cannot reach the outside through 4-connected
/// non-component pixels.
fn filled_mean(
    gray: &GrayImage,
    labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
    seed: Point<i32>,
    bbox: &BoundingBox,
) -> f64 {
    let label = labels.get_pixel(seed.x as u32, seed.y as u32).0[0];

    // Padded local grid: one ring of guaranteed-outside cells around the box.
    let w = bbox.w as usize + 2;
    let h = bbox.h as usize + 2;
    let in_component = |lx: usize, ly: usize| -> bool {
        if lx == 0 || ly == 0 || lx == w - 1 || ly == h - 1 {
            return false;
        }
        let x = bbox.x + lx as u32 - 1;
        let y = bbox.y + ly as u32 - 1;
        labels.get_pixel(x, y).0[0] == label
    };

    let mut outside = vec![false; w * h];
    let mut queue = VecDeque::from([(0usize, 0usize)]);
    outside[0] = true;
    while let Some((x, y)) = queue.pop_front() {
        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbors {
            if nx >= w || ny >= h || outside[ny * w + nx] || in_component(nx, ny) {
                continue;
            }
            outside[ny * w + nx] = true;
            queue.push_back((nx, ny));
        }
    }

    let mut sum = 0u64;
    let mut count = 0u64;
    for ly in 1..h - 1 {
        for lx in 1..w - 1 {
            if outside[ly * w + lx] {
                continue;
            }
            let x = bbox.x + lx as u32 - 1;
            let y = bbox.y + ly as u32 - 1;
            sum += gray.get_pixel(x, y).0[0] as u64;
            count += 1;
        }
    }
    if count == 0 {
        return gray.get_pixel(seed.x as u32, seed.y as u32).0[0] as f64;
    }
    sum as f64 / count as f64
}
