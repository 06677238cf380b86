use crate::error::{MotionError, MotionResult};
use crate::frame::Roi;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dense flow estimator settings. The defaults are the fixed values the
/// measurement is calibrated against and should not be changed casually.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowParameters {
    pub pyr_scale: f64,
    pub levels: usize,
    pub win_size: usize,
    pub iterations: usize,
    pub poly_n: usize,
    pub poly_sigma: f64,
}

impl Default for FlowParameters {
    fn default() -> Self {
        FlowParameters {
            pyr_scale: 0.5,
            levels: 3,
            win_size: 15,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
        }
    }
}

impl FlowParameters {
    pub fn validate(&self) -> MotionResult<()> {
        if !(self.pyr_scale > 0.0 && self.pyr_scale < 1.0) {
            return Err(MotionError::config(format!(
                "Pyramid scale must be within (0, 1), got {}",
                self.pyr_scale
            )));
        }
        if self.win_size == 0 || self.iterations == 0 || self.poly_n == 0 {
            return Err(MotionError::config(
                "Window size, iterations and polynomial neighborhood must be non-zero",
            ));
        }
        if self.poly_sigma < 0.0 {
            return Err(MotionError::config(format!(
                "Polynomial sigma must not be negative, got {}",
                self.poly_sigma
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MeasureParameters {
    pub roi: Roi,
    /// Physical distance covered by one pixel of displacement
    pub pixel_to_distance: f64,
    pub distance_units: String,
    pub noise_floor: f32,
    pub percentile: f64,
    pub smoothing_kernel: u32,
    pub arrow_stride: usize,
    pub max_arrow_length: f32,
    pub min_arrow_magnitude: f32,
    pub output_fps: f64,
    pub max_frames: Option<usize>,
    pub preprocess_first_frame: bool,
    pub flow: FlowParameters,
}

impl Default for MeasureParameters {
    fn default() -> Self {
        MeasureParameters {
            roi: Roi::default(),
            pixel_to_distance: 0.0698,
            distance_units: "cm".to_owned(),
            noise_floor: 1.0,
            percentile: 95.0,
            smoothing_kernel: 5,
            arrow_stride: 10,
            max_arrow_length: 5.0,
            min_arrow_magnitude: 1.0,
            output_fps: 30.0,
            max_frames: None,
            preprocess_first_frame: false,
            flow: FlowParameters::default(),
        }
    }
}

impl MeasureParameters {
    /// Checks everything that doesn't depend on the frame size.
    pub fn validate(&self) -> MotionResult<()> {
        if !(self.pixel_to_distance > 0.0) || !self.pixel_to_distance.is_finite() {
            return Err(MotionError::config(format!(
                "Calibration constant must be positive, got {}",
                self.pixel_to_distance
            )));
        }
        if !(self.percentile > 0.0 && self.percentile <= 100.0) {
            return Err(MotionError::config(format!(
                "Percentile must be within (0, 100], got {}",
                self.percentile
            )));
        }
        if self.noise_floor < 0.0 {
            return Err(MotionError::config("Noise floor must not be negative"));
        }
        if self.smoothing_kernel == 0 || self.smoothing_kernel % 2 == 0 {
            return Err(MotionError::config(format!(
                "Smoothing kernel size must be odd and positive, got {}",
                self.smoothing_kernel
            )));
        }
        if self.arrow_stride == 0 {
            return Err(MotionError::config("Arrow sampling stride must be non-zero"));
        }
        if self.max_arrow_length < 0.0 || self.min_arrow_magnitude < 0.0 {
            return Err(MotionError::config(
                "Arrow length and magnitude limits must not be negative",
            ));
        }
        if !(self.output_fps > 0.0) {
            return Err(MotionError::config(format!(
                "Output frame rate must be positive, got {}",
                self.output_fps
            )));
        }
        self.flow.validate()
    }

    pub fn validate_for_frame(&self, frame_width: u32, frame_height: u32) -> MotionResult<()> {
        self.validate()?;
        self.roi.validate(frame_width, frame_height)
    }
}

pub fn load_parameters(file_path: &str) -> Result<MeasureParameters> {
    if !Path::new(file_path).exists() {
        Err(anyhow!("File not found: {}", file_path))
    } else {
        let t = std::fs::read_to_string(file_path)?;
        Ok(toml::from_str(&t)?)
    }
}
