use anyhow::{anyhow, Result};
use image::RgbImage;

/// Receives annotated frames in order. Nothing may be created on disk before `open`.
pub trait FrameSink {
    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<()>;
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;
    /// Flushes and closes the artifact.
    fn finish(&mut self) -> Result<()>;
}

/// Keeps every written frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub opened_with: Option<(u32, u32, f64)>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }
}

impl FrameSink for MemorySink {
    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<()> {
        self.opened_with = Some((width, height, fps));
        Ok(())
    }

    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if self.opened_with.is_none() {
            return Err(anyhow!("Frame written before sink was opened"));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Discards frames, for runs that only want the measurement.
#[derive(Debug, Default)]
pub struct NullSink {}

impl FrameSink for NullSink {
    fn open(&mut self, _width: u32, _height: u32, _fps: f64) -> Result<()> {
        Ok(())
    }

    fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
