//! gantry - executes a single CI build from a JSON payload.

use std::process::ExitCode;

use clap::Parser;

use gantry::cli::Args;
use gantry::infrastructure::logging;
use gantry::pipeline::config::parse_debug;
use gantry::pipeline::Error;
use gantry::{exec, Outcome};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let payload = match args.load_payload() {
        Ok(payload) => payload,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(args.debug || parse_debug(&payload.yaml));

    let options = exec::Options::from(&args);
    match exec::run(payload, options).await {
        Ok(outcome) => {
            if outcome == Outcome::Success {
                ExitCode::SUCCESS
            } else {
                // Exit codes are clamped to the platform's 8-bit range.
                ExitCode::from(u8::try_from(outcome.exit_code()).unwrap_or(255))
            }
        }
        Err(err) => {
            // The detailed message can quote injected pipeline text, so it
            // only reaches the debug log.
            tracing::debug!(error = %err, "build aborted");
            let category = match err {
                Error::Config(_) => "unable to load the build secrets",
                Error::Parse(_) => "unable to parse the pipeline document",
                Error::Launch(_) => "unable to reach the container daemon",
            };
            eprintln!("Error: {category}");
            ExitCode::FAILURE
        }
    }
}
