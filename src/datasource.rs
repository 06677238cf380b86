use anyhow::{anyhow, Error, Result};
use image::RgbImage;
use std::collections::VecDeque;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ColorFormatId {
    Mono = 0,
    BayerRggb = 8,
    BayerGrbg = 9,
    BayerGbrg = 10,
    BayerBggr = 11,
    BayerCyym = 16,
    BayerYcmy = 17,
    BayerYmcy = 18,
    BayerMyyc = 19,
    Rgb = 100,
    Bgr = 101,
}

impl ColorFormatId {
    pub fn from_i32(v: i32) -> Result<ColorFormatId> {
        match v {
            0 => Ok(ColorFormatId::Mono),
            8 => Ok(ColorFormatId::BayerRggb),
            9 => Ok(ColorFormatId::BayerGrbg),
            10 => Ok(ColorFormatId::BayerGbrg),
            11 => Ok(ColorFormatId::BayerBggr),
            16 => Ok(ColorFormatId::BayerCyym),
            17 => Ok(ColorFormatId::BayerYcmy),
            18 => Ok(ColorFormatId::BayerYmcy),
            19 => Ok(ColorFormatId::BayerMyyc),
            100 => Ok(ColorFormatId::Rgb),
            101 => Ok(ColorFormatId::Bgr),
            _ => Err(anyhow!("Invalid color format enum value: {}", v)),
        }
    }

    pub fn num_planes(&self) -> usize {
        match self {
            ColorFormatId::Rgb | ColorFormatId::Bgr => 3,
            _ => 1,
        }
    }
}

/// Decoded video frames in presentation order.
///
/// `next_frame` returns `Ok(None)` at the end of the stream and `Err` when a
/// frame could not be decoded.
pub trait FrameSource {
    /// Frame size if known without decoding a frame
    fn frame_dimensions(&self) -> Option<(u32, u32)>;

    fn frame_count(&self) -> Option<usize> {
        None
    }

    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

pub struct EmptySource {}

impl FrameSource for EmptySource {
    fn frame_dimensions(&self) -> Option<(u32, u32)> {
        None
    }

    fn frame_count(&self) -> Option<usize> {
        Some(0)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(None)
    }
}

/// Frames held in memory. An entry of `None` simulates a decode failure at that position.
#[derive(Default)]
pub struct MemorySource {
    frames: VecDeque<Option<RgbImage>>,
    frame_rate: Option<f64>,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        MemorySource {
            frames: frames.into_iter().map(Some).collect(),
            frame_rate: None,
        }
    }

    pub fn with_decode_failure_at(mut self, position: usize) -> Self {
        let at = position.min(self.frames.len());
        self.frames.insert(at, None);
        self
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }
}

impl FrameSource for MemorySource {
    fn frame_dimensions(&self) -> Option<(u32, u32)> {
        self.frames
            .iter()
            .find_map(|f| f.as_ref().map(|f| f.dimensions()))
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.frames.iter().filter(|f| f.is_some()).count())
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.frames.pop_front() {
            Some(Some(frame)) => Ok(Some(frame)),
            Some(None) => Err(Error::msg("Simulated frame decode failure")),
            None => Ok(None),
        }
    }
}
