use crate::error::{MotionError, MotionResult};
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Fixed rectangular window, in full-frame pixel coordinates, where motion is measured.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Roi {
    fn default() -> Self {
        Roi {
            x: 200,
            y: 200,
            width: 100,
            height: 100,
        }
    }
}

impl Display for Roi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x, self.y, self.width, self.height)
    }
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Roi {
            x,
            y,
            width,
            height,
        }
    }

    /// Parses `x,y,w,h`.
    pub fn from(s: &str) -> MotionResult<Roi> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|e| MotionError::config(format!("Invalid ROI '{}': {}", s, e)))?;

        if parts.len() != 4 {
            return Err(MotionError::config(format!(
                "Invalid ROI '{}': expected x,y,width,height",
                s
            )));
        }
        Ok(Roi::new(parts[0], parts[1], parts[2], parts[3]))
    }

    pub fn validate(&self, frame_width: u32, frame_height: u32) -> MotionResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MotionError::config(format!("ROI {} is empty", self)));
        }

        // u64 so that x + width can't wrap
        if self.x as u64 + self.width as u64 > frame_width as u64
            || self.y as u64 + self.height as u64 > frame_height as u64
        {
            return Err(MotionError::config(format!(
                "ROI {} exceeds frame bounds {}x{}",
                self, frame_width, frame_height
            )));
        }
        Ok(())
    }

    pub fn crop(&self, frame: &GrayImage) -> GrayImage {
        image::imageops::crop_imm(frame, self.x, self.y, self.width, self.height).to_image()
    }
}

/// Converts a color frame to 8-bit luma using the BT.601 weights with fixed-point rounding.
pub fn to_grayscale(frame: &RgbImage) -> GrayImage {
    const R_W: u32 = 4899;
    const G_W: u32 = 9617;
    const B_W: u32 = 1868;
    const SHIFT: u32 = 14;

    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let p = frame.get_pixel(x, y);
        let v = (p[0] as u32 * R_W + p[1] as u32 * G_W + p[2] as u32 * B_W + (1 << (SHIFT - 1)))
            >> SHIFT;
        Luma([v.min(255) as u8])
    })
}

/// Per-pixel displacement vectors over the ROI, in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    pub width: usize,
    pub height: usize,
    data: Vec<[f32; 2]>,
}

impl FlowField {
    pub fn zeros(width: usize, height: usize) -> Self {
        FlowField {
            width,
            height,
            data: vec![[0.0, 0.0]; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<[f32; 2]>) -> MotionResult<Self> {
        if data.len() != width * height {
            return Err(MotionError::config(format!(
                "Flow data length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(FlowField {
            width,
            height,
            data,
        })
    }

    pub fn get(&self, x: usize, y: usize) -> [f32; 2] {
        self.data[y * self.width + x]
    }

    pub fn put(&mut self, x: usize, y: usize, v: [f32; 2]) {
        self.data[y * self.width + x] = v;
    }

    pub fn as_slice(&self) -> &[[f32; 2]] {
        &self.data
    }

    pub fn magnitude(&self) -> MagnitudeField {
        MagnitudeField {
            width: self.width,
            height: self.height,
            values: self
                .data
                .iter()
                .map(|[dx, dy]| (dx * dx + dy * dy).sqrt())
                .collect(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|[dx, dy]| *dx == 0.0 && *dy == 0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MagnitudeField {
    pub width: usize,
    pub height: usize,
    values: Vec<f32>,
}

impl MagnitudeField {
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn max(&self) -> f32 {
        self.values.iter().cloned().fold(0.0, f32::max)
    }
}
