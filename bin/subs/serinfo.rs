use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::Path;

use roiflow::ser;

use crate::subs::runnable::RunnableSubcommand;

#[derive(Parser)]
#[command(author, version, about = "Print information from a SER file", long_about = None)]
pub struct SerInfo {
    #[clap(long, short, help = "Input ser file")]
    input_file: String,
}

#[async_trait::async_trait]
impl RunnableSubcommand for SerInfo {
    async fn run(&self) -> Result<()> {
        if !Path::new(&self.input_file).exists() {
            return Err(anyhow!("File not found: {}", self.input_file));
        }
        let ser_file = ser::SerFile::load_ser(&self.input_file)?;
        ser_file.print_header_details();
        Ok(())
    }
}
