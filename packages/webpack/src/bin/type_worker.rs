// Type-checker worker process. Forked by the plugin with a marker
// argument; reads one JSON message per stdin line and reports diagnostics
// on stderr until stdin closes.

use anyhow::Result;
use clap::Parser;
use ngtools_webpack::logging::{ConsoleLogger, LogLevel};
use ngtools_webpack::type_checker::{run_type_checker_worker, AUTO_START_ARG};
use std::io::BufReader;

#[derive(Parser)]
#[command(name = "ngtools_type_worker", disable_help_subcommand = true)]
struct Args {
    /// Also log per-update progress, not just diagnostics.
    #[arg(long)]
    verbose: bool,

    /// Forwarded exec arguments and the fork marker.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.rest.iter().any(|a| a == AUTO_START_ARG) {
        eprintln!("This binary is started by the build plugin and reads messages on stdin.");
    }
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let logger = ConsoleLogger::new(level);
    let input = BufReader::new(std::io::stdin());
    run_type_checker_worker(input, &logger)
}
