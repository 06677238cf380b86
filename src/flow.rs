use crate::context::FlowParameters;
use crate::error::MotionResult;
use crate::farneback::Farneback;
use crate::frame::{FlowField, Roi};
use image::GrayImage;

/// Computes a dense displacement field over `roi` between two preprocessed
/// grayscale frames of identical size.
pub trait FlowEstimator {
    fn estimate(&self, previous: &GrayImage, current: &GrayImage, roi: &Roi) -> MotionResult<FlowField>;
}

pub fn estimate_flow(
    previous: &GrayImage,
    current: &GrayImage,
    roi: &Roi,
    params: &FlowParameters,
) -> MotionResult<FlowField> {
    Farneback::new(*params).estimate(previous, current, roi)
}
