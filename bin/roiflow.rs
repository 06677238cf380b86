mod subs;
use anyhow::Result;
use colored::Colorize;
use subs::runnable::RunnableSubcommand;
use subs::*;

#[macro_use]
extern crate stump;

extern crate wild;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(name = "roiflow")]
#[clap(about = "Region of interest motion measurement", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: RoiFlow,

    #[clap(long, short, help = "Verbose output")]
    verbose: bool,
}

#[derive(Subcommand)]
enum RoiFlow {
    Measure(measure::Measure),
    PreProcess(preprocess::PreProcess),
    SerInfo(serinfo::SerInfo),
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let t1 = std::time::Instant::now();

    stump::set_min_log_level(stump::LogEntryLevel::WARN);
    info!("Initialized logging"); // Below WARN, so hidden unless raised by
                                  // the environment or --verbose.

    let args = Cli::parse_from(wild::args());

    if args.verbose {
        stump::set_verbose(true);
    }

    if let Err(why) = match args.command {
        RoiFlow::Measure(args) => args.run().await,
        RoiFlow::PreProcess(args) => args.run().await,
        RoiFlow::SerInfo(args) => args.run().await,
    } {
        error!("{}", "Unhandled program error:".red());
        error!("{}", why);
        std::process::exit(1);
    };
    info!("Runtime: {}s", t1.elapsed().as_secs_f64());
    Ok(())
}
