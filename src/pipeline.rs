use crate::annotate::{annotate_frame, ArrowOptions};
use crate::context::MeasureParameters;
use crate::datasource::FrameSource;
use crate::error::{MotionError, MotionResult};
use crate::farneback::Farneback;
use crate::flow::FlowEstimator;
use crate::frame::{to_grayscale, FlowField};
use crate::framesink::FrameSink;
use crate::magnitude::{analyze_motion, MotionAnalysis};
use crate::preprocess::preprocess_frame;
use crate::stats::{Accumulator, FrameMotion, MotionReport, RunOutcome};
use image::{GrayImage, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Running,
    Done,
    Failed,
}

/// Cooperative cancellation flag, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        StopSignal::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything produced for one frame pair.
pub struct FrameStep {
    pub preprocessed: GrayImage,
    pub flow: FlowField,
    pub analysis: MotionAnalysis,
    pub annotated: RgbImage,
}

pub struct MotionPipeline<E: FlowEstimator = Farneback> {
    params: MeasureParameters,
    estimator: E,
    stop: StopSignal,
    state: PipelineState,
}

impl MotionPipeline<Farneback> {
    pub fn new(params: &MeasureParameters) -> MotionResult<Self> {
        MotionPipeline::with_estimator(params, Farneback::new(params.flow))
    }
}

impl<E: FlowEstimator> MotionPipeline<E> {
    pub fn with_estimator(params: &MeasureParameters, estimator: E) -> MotionResult<Self> {
        params.validate()?;
        Ok(MotionPipeline {
            params: params.to_owned(),
            estimator,
            stop: StopSignal::new(),
            state: PipelineState::Init,
        })
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn arrow_options(&self) -> ArrowOptions {
        ArrowOptions {
            stride: self.params.arrow_stride,
            max_length: self.params.max_arrow_length,
            min_magnitude: self.params.min_arrow_magnitude,
        }
    }

    fn fail<T>(&mut self, err: MotionError) -> MotionResult<T> {
        self.state = PipelineState::Failed;
        Err(err)
    }

    /// Runs one frame pair: `previous` is the carried grayscale frame, `frame` the
    /// newly decoded color frame.
    pub fn process_pair(&self, previous: &GrayImage, frame: &RgbImage) -> MotionResult<FrameStep> {
        let preprocessed = preprocess_frame(&to_grayscale(frame), self.params.smoothing_kernel);
        let flow = self
            .estimator
            .estimate(previous, &preprocessed, &self.params.roi)?;
        let analysis = analyze_motion(
            &flow,
            self.params.noise_floor,
            self.params.percentile,
            self.params.pixel_to_distance,
        );
        let annotated = annotate_frame(
            frame,
            &flow,
            &self.params.roi,
            &analysis.magnitude,
            &self.arrow_options(),
        );

        Ok(FrameStep {
            preprocessed,
            flow,
            analysis,
            annotated,
        })
    }

    /// Reads `source` to the end, writing one annotated frame to `sink` for every
    /// frame after the first. `on_frame` sees each frame's measurement as it completes.
    pub fn run<S, K, F>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        mut on_frame: F,
    ) -> MotionResult<MotionReport>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(&FrameMotion),
    {
        self.state = PipelineState::Init;

        if let Some((width, height)) = source.frame_dimensions() {
            if let Err(e) = self.params.validate_for_frame(width, height) {
                return self.fail(e);
            }
        }

        let first = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return self.fail(MotionError::StreamUnreadable(
                    "source contains no frames".to_owned(),
                ))
            }
            Err(why) => return self.fail(MotionError::StreamUnreadable(why.to_string())),
        };

        let (width, height) = first.dimensions();
        if let Err(e) = self.params.validate_for_frame(width, height) {
            return self.fail(e);
        }

        let mut previous = to_grayscale(&first);
        if self.params.preprocess_first_frame {
            previous = preprocess_frame(&previous, self.params.smoothing_kernel);
        }
        drop(first);

        let fps = source.frame_rate().unwrap_or(self.params.output_fps);
        if let Err(why) = sink.open(width, height, fps) {
            return self.fail(MotionError::Sink(why.to_string()));
        }

        info!(
            "Measuring motion in ROI {} of {}x{} frames",
            self.params.roi, width, height
        );
        self.state = PipelineState::Running;

        let mut acc = Accumulator::new();
        let mut frames: Vec<FrameMotion> = vec![];
        let mut frame_index = 0;

        let outcome = loop {
            if self.stop.is_stopped() {
                warn!("Stop requested after {} frames", acc.frame_count);
                if let Err(why) = sink.finish() {
                    warn!("Failed to close output after stop: {}", why);
                }
                return self.fail(MotionError::Aborted {
                    frames_processed: acc.frame_count,
                });
            }

            if let Some(max_frames) = self.params.max_frames {
                if acc.frame_count >= max_frames {
                    break RunOutcome::FrameLimit;
                }
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break RunOutcome::Completed,
                Err(why) => {
                    warn!("Frame decode failed, ending stream: {}", why);
                    break RunOutcome::Truncated;
                }
            };
            frame_index += 1;

            if frame.dimensions() != (width, height) {
                let (found_width, found_height) = frame.dimensions();
                warn!(
                    "{}, ending stream",
                    MotionError::FrameMismatch {
                        width,
                        height,
                        found_width,
                        found_height,
                    }
                );
                break RunOutcome::Truncated;
            }

            let step = match self.process_pair(&previous, &frame) {
                Ok(step) => step,
                Err(e) => {
                    if let Err(why) = sink.finish() {
                        warn!("Failed to close output after error: {}", why);
                    }
                    return self.fail(e);
                }
            };

            if let Err(why) = sink.write_frame(&step.annotated) {
                if let Err(close) = sink.finish() {
                    warn!("Failed to close output after write error: {}", close);
                }
                return self.fail(MotionError::Sink(why.to_string()));
            }

            acc = acc.accumulate(step.analysis.distance);
            let motion = FrameMotion {
                frame_index,
                percentile_px: step.analysis.percentile_px,
                distance: step.analysis.distance,
                moving_pixels: step.analysis.moving_pixels,
            };
            info!(
                "Frame {}: {} percentile motion: {:.2} {}",
                frame_index, self.params.percentile, motion.distance, self.params.distance_units
            );
            on_frame(&motion);
            frames.push(motion);

            previous = step.preprocessed;
        };

        if let Err(why) = sink.finish() {
            return self.fail(MotionError::Sink(why.to_string()));
        }
        self.state = PipelineState::Done;

        info!(
            "Total ROI motion: {:.2} {} over {} frames",
            acc.total_distance, self.params.distance_units, acc.frame_count
        );

        Ok(MotionReport {
            frame_count: acc.frame_count,
            total_distance: acc.total_distance,
            distance_units: self.params.distance_units.clone(),
            roi: self.params.roi,
            pixel_to_distance: self.params.pixel_to_distance,
            outcome,
            frames,
        })
    }
}
