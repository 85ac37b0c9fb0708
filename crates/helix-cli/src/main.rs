//! Helix CLI
//!
//! Encrypts a file to the user's own account and/or decrypts an envelope,
//! exiting with a status code that names the step that failed.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::{error, info};

use helix_cli::{Args, ExitStatus};
use helix_core::tracing_init::init_tracing;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(ExitStatus::ArgParse.code()),
            };
        }
    };

    init_tracing("helix_cli=info,helix_client=warn", args.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), user = %args.user, "Starting helix");

    match helix_cli::run(&args) {
        Ok(report) => {
            info!(
                input_bytes = report.input_bytes,
                encrypted = report.encrypted.is_some(),
                decrypted = report.decrypted.is_some(),
                "Finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(code = e.status.code(), error = %e, "Run failed");
            let _ = writeln!(std::io::stderr(), "Error: {e}");
            ExitCode::from(e.status.code())
        }
    }
}
