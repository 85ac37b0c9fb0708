//! Helix CLI Library
//!
//! File encryption front end for the Helix client: argument parsing, exit
//! codes, file I/O and the encrypt/decrypt pipeline behind the `helix`
//! binary.

pub mod args;
pub mod error;
pub mod files;
pub mod pipeline;

pub use args::Args;
pub use error::{CliError, ExitStatus};
pub use pipeline::{Report, run};
