use crate::subs::runnable::RunnableSubcommand;
use anyhow::Result;
use clap::Parser;
use roiflow::context::{load_parameters, MeasureParameters};
use roiflow::datasource::FrameSource;
use roiflow::error::MotionError;
use roiflow::frame::Roi;
use roiflow::framesink::{FrameSink, NullSink};
use roiflow::imageseq::{ImageSequenceSink, ImageSequenceSource};
use roiflow::pipeline::{MotionPipeline, StopSignal};
use roiflow::ser::{SerFile, SerWriter};
use std::path::Path;

pb_create!();

/// Frame pairs the run will process: one fewer than the frames, capped by the limit.
fn progress_length(frame_count: Option<usize>, max_frames: Option<usize>) -> usize {
    let pairs = frame_count.unwrap_or(1).saturating_sub(1);
    match max_frames {
        Some(limit) => pairs.min(limit),
        None => pairs,
    }
}

#[derive(Parser)]
#[command(author, version, about = "Measure motion inside a region of interest", long_about = None)]
pub struct Measure {
    #[clap(
        long,
        short,
        help = "Input SER file, directory of frame images, or list of frame images"
    )]
    input_files: Vec<String>,

    #[clap(
        long,
        short,
        help = "Output SER file (.ser) or directory for annotated frames"
    )]
    output: Option<String>,

    #[clap(long, short, help = "Parameter file (TOML)")]
    config: Option<String>,

    #[clap(long, short = 'R', help = "Region of interest as x,y,width,height")]
    roi: Option<String>,

    #[clap(long, short, help = "Distance per pixel of displacement")]
    pixel_to_distance: Option<f64>,

    #[clap(long, short, help = "Distance units label")]
    units: Option<String>,

    #[clap(long, help = "Noise floor in pixels")]
    noise_floor: Option<f32>,

    #[clap(long, short, help = "Output frame rate")]
    fps: Option<f64>,

    #[clap(long, short, help = "Number of frame pairs (default=all)")]
    number_of_frames: Option<usize>,

    #[clap(long, help = "Also preprocess the first frame")]
    preprocess_first: bool,

    #[clap(long, short = 'r', help = "Process report path")]
    report: Option<String>,
}

impl Measure {
    fn parameters(&self) -> Result<MeasureParameters> {
        let mut params = if let Some(config) = &self.config {
            info!("Loading parameters from {}", config);
            load_parameters(config)?
        } else {
            MeasureParameters::default()
        };

        if let Some(roi) = &self.roi {
            params.roi = Roi::from(roi)?;
        }
        if let Some(p) = self.pixel_to_distance {
            params.pixel_to_distance = p;
        }
        if let Some(units) = &self.units {
            params.distance_units = units.to_owned();
        }
        if let Some(nf) = self.noise_floor {
            params.noise_floor = nf;
        }
        if let Some(fps) = self.fps {
            params.output_fps = fps;
        }
        if self.number_of_frames.is_some() {
            params.max_frames = self.number_of_frames;
        }
        if self.preprocess_first {
            params.preprocess_first_frame = true;
        }
        Ok(params)
    }

    fn open_source(&self) -> Result<Box<dyn FrameSource + Send>, MotionError> {
        let unreadable = |why: anyhow::Error| MotionError::StreamUnreadable(why.to_string());

        match self.input_files.as_slice() {
            [] => Err(MotionError::StreamUnreadable(
                "No input files specified".to_owned(),
            )),
            [single] if Path::new(single).is_dir() => Ok(Box::new(
                ImageSequenceSource::from_directory(single).map_err(unreadable)?,
            )),
            [single] if single.to_uppercase().ends_with(".SER") => {
                Ok(Box::new(SerFile::load_ser(single).map_err(unreadable)?))
            }
            files => Ok(Box::new(ImageSequenceSource::from_files(files))),
        }
    }

    fn open_sink(&self) -> Box<dyn FrameSink + Send> {
        match &self.output {
            Some(out) if out.to_uppercase().ends_with(".SER") => Box::new(SerWriter::new(out)),
            Some(out) => Box::new(ImageSequenceSink::new(out)),
            None => {
                warn!("No output specified, annotated frames will be discarded");
                Box::new(NullSink::default())
            }
        }
    }
}

#[async_trait::async_trait]
impl RunnableSubcommand for Measure {
    async fn run(&self) -> Result<()> {
        pb_set_print!();

        let params = self.parameters()?;
        let mut source = self.open_source()?;
        let mut sink = self.open_sink();

        let stop = StopSignal::new();
        let interrupt = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current frame");
                interrupt.stop();
            }
        });

        let mut pipeline = MotionPipeline::new(&params)?.with_stop_signal(stop);

        pb_set_prefix!("Measuring Frames");
        pb_set_length!(progress_length(
            source.frame_count(),
            params.max_frames
        ));

        let report = tokio::task::spawn_blocking(move || {
            pipeline.run(source.as_mut(), sink.as_mut(), |_fm| {
                pb_inc!();
            })
        })
        .await??;

        pb_done!();

        println!(
            "Total ROI motion: {:.2} {} over {} frames",
            report.total_distance, report.distance_units, report.frame_count
        );
        println!(
            "Largest single frame motion: {:.2} {}",
            report.max_distance(),
            report.distance_units
        );

        if let Some(report_path) = &self.report {
            info!("Writing report to {}", report_path);
            report.save(report_path)?;
        }
        Ok(())
    }
}
