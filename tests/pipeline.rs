use anyhow::Result;
use image::{Rgb, RgbImage};
use roiflow::context::MeasureParameters;
use roiflow::datasource::{EmptySource, FrameSource, MemorySource};
use roiflow::error::MotionError;
use roiflow::frame::Roi;
use roiflow::framesink::{FrameSink, MemorySink};
use roiflow::pipeline::{MotionPipeline, PipelineState};
use roiflow::stats::{FrameMotion, RunOutcome};
use std::f32::consts::PI;

fn uniform(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([90, 90, 90]))
}

fn textured(width: u32, height: u32, shift_x: f32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let xf = x as f32 - shift_x;
        let yf = y as f32;
        let v = 128.0
            + 50.0 * (xf * 2.0 * PI / 48.0).sin() * (yf * 2.0 * PI / 40.0).cos()
            + 40.0 * ((xf + yf) * 2.0 * PI / 64.0).sin();
        let v = v.clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    })
}

fn translating(count: usize, step: f32) -> Vec<RgbImage> {
    translating_frames(400, 400, count, step)
}

/// Counts reads so tests can check that nothing was pulled from the source.
struct CountingSource {
    inner: MemorySource,
    reads: usize,
}

impl FrameSource for CountingSource {
    fn frame_dimensions(&self) -> Option<(u32, u32)> {
        self.inner.frame_dimensions()
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        self.reads += 1;
        self.inner.next_frame()
    }
}

#[test]
fn test_static_video_measures_nothing() -> Result<()> {
    let params = MeasureParameters {
        roi: Roi::new(200, 200, 100, 100),
        ..Default::default()
    };
    let mut source = MemorySource::new(vec![uniform(640, 480); 3]);
    let mut sink = MemorySink::new();
    let mut pipeline = MotionPipeline::new(&params)?;

    let report = pipeline.run(&mut source, &mut sink, |_| {})?;

    assert_eq!(report.frame_count, 2);
    assert_eq!(format!("{:.2}", report.total_distance), "0.00");
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(pipeline.state(), PipelineState::Done);

    assert_eq!(sink.opened_with, Some((640, 480, 30.0)));
    assert_eq!(sink.frames.len(), 2);
    assert!(sink.finished);
    sink.frames
        .iter()
        .for_each(|f| assert_eq!(f.dimensions(), (640, 480)));
    Ok(())
}

#[test]
fn test_identical_textured_frames() -> Result<()> {
    let params = MeasureParameters {
        preprocess_first_frame: true,
        ..Default::default()
    };
    let mut source = MemorySource::new(vec![textured(400, 400, 0.0); 3]);
    let mut sink = MemorySink::new();
    let report = MotionPipeline::new(&params)?.run(&mut source, &mut sink, |_| {})?;

    assert_eq!(report.frame_count, 2);
    assert_eq!(report.total_distance, 0.0);
    report
        .frames
        .iter()
        .for_each(|f| assert_eq!(f.moving_pixels, 0));
    Ok(())
}

fn translating_frames(width: u32, height: u32, count: usize, step: f32) -> Vec<RgbImage> {
    (0..count)
        .map(|i| textured(width, height, i as f32 * step))
        .collect()
}

#[test]
fn test_five_pixel_translation() -> Result<()> {
    let params = MeasureParameters {
        preprocess_first_frame: true,
        ..Default::default()
    };
    let mut source = MemorySource::new(translating_frames(640, 480, 5, 5.0));
    let mut sink = MemorySink::new();
    let report = MotionPipeline::new(&params)?.run(&mut source, &mut sink, |_| {})?;

    assert_eq!(report.frame_count, 4);
    report.frames.iter().for_each(|f| {
        assert!(
            (f.percentile_px - 5.0).abs() < 0.25,
            "frame {} measured {} px",
            f.frame_index,
            f.percentile_px
        );
        assert!((f.distance - 5.0 * 0.0698).abs() < 0.02);
        assert!((f.distance - f.percentile_px * 0.0698).abs() < 1e-9);
    });
    assert!((report.total_distance - 4.0 * 5.0 * 0.0698).abs() < 0.08);
    assert!((report.max_distance() - 5.0 * 0.0698).abs() < 0.02);
    Ok(())
}

#[test]
fn test_first_pair_uses_unprocessed_seed() -> Result<()> {
    let run = |preprocess_first_frame: bool| -> Result<Vec<FrameMotion>> {
        let params = MeasureParameters {
            preprocess_first_frame,
            ..Default::default()
        };
        let mut source = MemorySource::new(translating_frames(640, 480, 5, 5.0));
        let report =
            MotionPipeline::new(&params)?.run(&mut source, &mut MemorySink::new(), |_| {})?;
        Ok(report.frames)
    };

    // the default seed is grayscale only
    assert!(!MeasureParameters::default().preprocess_first_frame);
    let raw_seed = run(false)?;
    let processed_seed = run(true)?;

    assert_eq!(raw_seed.len(), 4);
    assert_ne!(
        raw_seed[0].percentile_px.to_bits(),
        processed_seed[0].percentile_px.to_bits()
    );

    // after the first pair both runs compare preprocessed frames only
    assert_eq!(raw_seed[1..], processed_seed[1..]);
    raw_seed[1..].iter().for_each(|f| {
        assert!(
            (f.percentile_px - 5.0).abs() < 0.25,
            "frame {} measured {} px",
            f.frame_index,
            f.percentile_px
        );
    });
    Ok(())
}

#[test]
fn test_runs_are_deterministic() -> Result<()> {
    let params = MeasureParameters::default();
    let run = || -> Result<(usize, f64)> {
        let mut source = MemorySource::new(translating(3, 2.0));
        let mut sink = MemorySink::new();
        let report = MotionPipeline::new(&params)?.run(&mut source, &mut sink, |_| {})?;
        Ok((report.frame_count, report.total_distance))
    };

    let (c1, t1) = run()?;
    let (c2, t2) = run()?;
    assert_eq!(c1, c2);
    assert_eq!(t1.to_bits(), t2.to_bits());
    Ok(())
}

#[test]
fn test_per_frame_callback_and_running_total() -> Result<()> {
    let params = MeasureParameters::default();
    let mut source = MemorySource::new(translating(4, 3.0));
    let mut sink = MemorySink::new();
    let mut seen = vec![];
    let report = MotionPipeline::new(&params)?.run(&mut source, &mut sink, |fm| {
        seen.push(fm.frame_index)
    })?;

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(sink.frames.len(), report.frame_count);

    let mut running = 0.0;
    report.frames.iter().for_each(|f| {
        assert!(f.distance >= 0.0);
        let next = running + f.distance;
        assert!(next >= running);
        running = next;
    });
    assert!((running - report.total_distance).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_empty_source_is_unreadable() -> Result<()> {
    let mut sink = MemorySink::new();
    let mut pipeline = MotionPipeline::new(&MeasureParameters::default())?;
    let result = pipeline.run(&mut EmptySource {}, &mut sink, |_| {});

    assert!(matches!(result, Err(MotionError::StreamUnreadable(_))));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(sink.opened_with.is_none());
    assert!(sink.frames.is_empty());
    Ok(())
}

#[test]
fn test_first_frame_decode_failure_is_unreadable() -> Result<()> {
    let mut source = MemorySource::new(vec![uniform(400, 400); 2]).with_decode_failure_at(0);
    let mut sink = MemorySink::new();
    let result = MotionPipeline::new(&MeasureParameters::default())?.run(
        &mut source,
        &mut sink,
        |_| {},
    );
    assert!(matches!(result, Err(MotionError::StreamUnreadable(_))));
    assert!(sink.opened_with.is_none());
    Ok(())
}

#[test]
fn test_oversized_roi_rejected_before_reading() -> Result<()> {
    let params = MeasureParameters {
        roi: Roi::new(0, 0, 10, 10),
        ..Default::default()
    };
    let mut source = CountingSource {
        inner: MemorySource::new(vec![uniform(5, 5); 3]),
        reads: 0,
    };
    let mut sink = MemorySink::new();
    let mut pipeline = MotionPipeline::new(&params)?;
    let result = pipeline.run(&mut source, &mut sink, |_| {});

    assert!(matches!(result, Err(MotionError::InvalidConfig(_))));
    assert_eq!(source.reads, 0);
    assert!(sink.opened_with.is_none());
    assert_eq!(pipeline.state(), PipelineState::Failed);
    Ok(())
}

#[test]
fn test_invalid_calibration_rejected() {
    let params = MeasureParameters {
        pixel_to_distance: 0.0,
        ..Default::default()
    };
    assert!(matches!(
        MotionPipeline::new(&params),
        Err(MotionError::InvalidConfig(_))
    ));
}

#[test]
fn test_mid_stream_decode_failure_ends_run() -> Result<()> {
    let mut source = MemorySource::new(vec![uniform(400, 400); 4]).with_decode_failure_at(2);
    let mut sink = MemorySink::new();
    let report = MotionPipeline::new(&MeasureParameters::default())?.run(
        &mut source,
        &mut sink,
        |_| {},
    )?;

    assert_eq!(report.frame_count, 1);
    assert_eq!(report.outcome, RunOutcome::Truncated);
    assert_eq!(sink.frames.len(), 1);
    assert!(sink.finished);
    Ok(())
}

#[test]
fn test_frame_size_change_ends_run() -> Result<()> {
    let frames = vec![uniform(400, 400), uniform(400, 400), uniform(500, 400)];
    let mut source = MemorySource::new(frames);
    let mut sink = MemorySink::new();
    let report = MotionPipeline::new(&MeasureParameters::default())?.run(
        &mut source,
        &mut sink,
        |_| {},
    )?;
    assert_eq!(report.frame_count, 1);
    assert_eq!(report.outcome, RunOutcome::Truncated);
    Ok(())
}

#[test]
fn test_frame_limit() -> Result<()> {
    let params = MeasureParameters {
        max_frames: Some(2),
        ..Default::default()
    };
    let mut source = MemorySource::new(vec![uniform(400, 400); 6]);
    let mut sink = MemorySink::new();
    let report = MotionPipeline::new(&params)?.run(&mut source, &mut sink, |_| {})?;
    assert_eq!(report.frame_count, 2);
    assert_eq!(report.outcome, RunOutcome::FrameLimit);
    assert_eq!(sink.frames.len(), 2);
    Ok(())
}

#[test]
fn test_stop_signal_aborts_and_keeps_emitted_frames() -> Result<()> {
    let mut source = MemorySource::new(vec![uniform(400, 400); 5]);
    let mut sink = MemorySink::new();
    let mut pipeline = MotionPipeline::new(&MeasureParameters::default())?;
    let stop = pipeline.stop_signal();

    let result = pipeline.run(&mut source, &mut sink, |_| stop.stop());

    assert!(matches!(
        result,
        Err(MotionError::Aborted {
            frames_processed: 1
        })
    ));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(sink.frames.len(), 1);
    assert!(sink.finished);
    Ok(())
}

#[test]
fn test_source_frame_rate_used_for_output() -> Result<()> {
    let mut source = MemorySource::new(vec![uniform(400, 400); 2]).with_frame_rate(24.0);
    let mut sink = MemorySink::new();
    MotionPipeline::new(&MeasureParameters::default())?.run(&mut source, &mut sink, |_| {})?;
    assert_eq!(sink.opened_with, Some((400, 400, 24.0)));
    Ok(())
}

/// Accepts `open` and then fails every write and the close.
#[derive(Default)]
struct FailingSink {
    finish_calls: usize,
}

impl FrameSink for FailingSink {
    fn open(&mut self, _width: u32, _height: u32, _fps: f64) -> Result<()> {
        Ok(())
    }

    fn write_frame(&mut self, _frame: &RgbImage) -> Result<()> {
        Err(anyhow::anyhow!("disk full"))
    }

    fn finish(&mut self) -> Result<()> {
        self.finish_calls += 1;
        Err(anyhow::anyhow!("close failed"))
    }
}

#[test]
fn test_write_failure_closes_sink() -> Result<()> {
    let mut source = MemorySource::new(vec![uniform(400, 400); 3]);
    let mut sink = FailingSink::default();
    let mut pipeline = MotionPipeline::new(&MeasureParameters::default())?;
    let result = pipeline.run(&mut source, &mut sink, |_| {});

    match result {
        Err(MotionError::Sink(why)) => assert!(why.contains("disk full")),
        other => panic!("unexpected result: {:?}", other.map(|r| r.frame_count)),
    }
    assert_eq!(sink.finish_calls, 1);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    Ok(())
}
