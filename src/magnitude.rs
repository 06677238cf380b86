use crate::frame::{FlowField, MagnitudeField};
use itertools::Itertools;

/// Summary of one frame pair's displacement.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionAnalysis {
    pub magnitude: MagnitudeField,
    /// Percentile of the above-noise magnitudes, in pixels. Zero when nothing moved.
    pub percentile_px: f64,
    /// `percentile_px` scaled to physical distance
    pub distance: f64,
    pub moving_pixels: usize,
}

/// Percentile with linear interpolation between the closest ranks. `None` on an empty slice.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let sorted: Vec<f64> = values
        .iter()
        .cloned()
        .sorted_by(|a, b| a.total_cmp(b))
        .collect();

    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn analyze_motion(
    flow: &FlowField,
    noise_floor: f32,
    pct: f64,
    pixel_to_distance: f64,
) -> MotionAnalysis {
    let magnitude = flow.magnitude();

    let moving: Vec<f64> = magnitude
        .values()
        .iter()
        .filter(|m| **m > noise_floor)
        .map(|m| *m as f64)
        .collect();

    let percentile_px = percentile(&moving, pct).unwrap_or(0.0);

    MotionAnalysis {
        moving_pixels: moving.len(),
        magnitude,
        percentile_px,
        distance: percentile_px * pixel_to_distance,
    }
}
