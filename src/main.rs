use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use wavekeeper::{logging, TrackerError};

mod cli;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli::dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<TrackerError>() {
                Some(tracked) => eprintln!(
                    "{} [{}]: {tracked}",
                    "error".red().bold(),
                    tracked.category()
                ),
                None => eprintln!("{}: {e:#}", "error".red().bold()),
            }
            ExitCode::FAILURE
        }
    }
}
