use crate::subs::runnable::RunnableSubcommand;
use anyhow::Result;
use clap::Parser;
use roiflow::frame::to_grayscale;
use roiflow::preprocess::{preprocess_frame, DEFAULT_KERNEL_SIZE};
use roiflow::ser::SerFile;

pb_create_spinner!();

#[derive(Parser)]
#[command(author, version, about = "Write the preprocessed (equalized and smoothed) grayscale version of a frame", long_about = None)]
pub struct PreProcess {
    #[clap(long, short, help = "Input image or SER file")]
    input_file: String,

    #[clap(long, short, help = "Output image")]
    output: String,

    #[clap(long, short = 'F', help = "Frame number within a SER file")]
    frame: Option<usize>,

    #[clap(long, short, help = "Smoothing kernel size")]
    kernel: Option<u32>,
}

#[async_trait::async_trait]
impl RunnableSubcommand for PreProcess {
    async fn run(&self) -> Result<()> {
        pb_set_print!();

        let frame = if self.input_file.to_uppercase().ends_with(".SER") {
            SerFile::load_ser(&self.input_file)?.get_frame(self.frame.unwrap_or(0))?
        } else {
            image::open(&self.input_file)?.to_rgb8()
        };

        info!(
            "Preprocessing {}x{} frame from {}",
            frame.width(),
            frame.height(),
            self.input_file
        );
        let result = preprocess_frame(
            &to_grayscale(&frame),
            self.kernel.unwrap_or(DEFAULT_KERNEL_SIZE),
        );
        result.save(&self.output)?;

        pb_done!();
        Ok(())
    }
}
