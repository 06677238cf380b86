use crate::frame::Roi;
use anyhow::Result;
use serde::Serialize;

/// Running totals across processed frame pairs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize)]
pub struct Accumulator {
    pub frame_count: usize,
    pub total_distance: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator::default()
    }

    pub fn accumulate(self, statistic: f64) -> Accumulator {
        Accumulator {
            frame_count: self.frame_count + 1,
            total_distance: self.total_distance + statistic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMotion {
    /// Index of the later frame of the pair within the source
    pub frame_index: usize,
    pub percentile_px: f64,
    pub distance: f64,
    pub moving_pixels: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Source was exhausted
    Completed,
    /// The configured frame limit was hit
    FrameLimit,
    /// A decode failure part way through ended the stream early
    Truncated,
}

#[derive(Debug, Clone, Serialize)]
pub struct MotionReport {
    pub frame_count: usize,
    pub total_distance: f64,
    pub distance_units: String,
    pub roi: Roi,
    pub pixel_to_distance: f64,
    pub outcome: RunOutcome,
    pub frames: Vec<FrameMotion>,
}

impl MotionReport {
    pub fn max_distance(&self) -> f64 {
        self.frames.iter().map(|f| f.distance).fold(0.0, f64::max)
    }

    pub fn save(&self, file_path: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Stamped<'a> {
            created: String,
            #[serde(flatten)]
            report: &'a MotionReport,
        }

        let stamped = Stamped {
            created: chrono::Local::now().to_rfc3339(),
            report: self,
        };
        std::fs::write(file_path, serde_json::to_string_pretty(&stamped)?)?;
        Ok(())
    }
}
