//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "helix")]
#[command(
    version,
    about = "Encrypt and decrypt files through a Helix key server",
    long_about = "Encrypt and decrypt files through a Helix key server.\n\n\
        Encrypted output goes to '<base>-encrypted', decrypted output to \
        '<base>-decrypted', where <base> is --output or the input's file name."
)]
pub struct Args {
    /// Key server host name or IP, without protocol [env: HELIX_SERVER]
    #[arg(short, long)]
    pub server: Option<String>,

    /// Key server port [env: HELIX_PORT]
    #[arg(long)]
    pub port: Option<u16>,

    /// Account name; created on first use.
    #[arg(short, long, env = "HELIX_USER")]
    pub user: String,

    /// Run as a simulated device with this identifier.
    #[arg(short = 'f', long = "simulated", env = "HELIX_SIMULATED_DEVICE")]
    pub simulated_device: Option<String>,

    /// Encrypt the input file to your own account.
    #[arg(short, long)]
    pub encrypt: bool,

    /// Decrypt the input file, or the result of --encrypt when both are given.
    #[arg(short, long)]
    pub decrypt: bool,

    /// Input file: plaintext, or an envelope for decryption.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Base name for output files.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Password mixed into the envelope key.
    #[arg(short, long, env = "HELIX_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Directory for device and account state [env: HELIX_DATA_DIR]
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Explicit config file, layered over the global one.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    pub log_json: bool,
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    #[test]
    fn demo_style_flags_parse() {
        let args = Args::try_parse_from([
            "helix", "-s", "keys.example", "--port", "7000", "-u", "alice", "-f", "sim-1", "-ed",
            "-i", "notes.txt", "-o", "out", "-p", "pw",
        ])
        .unwrap();
        assert_eq!(args.server.as_deref(), Some("keys.example"));
        assert_eq!(args.port, Some(7000));
        assert_eq!(args.user, "alice");
        assert_eq!(args.simulated_device.as_deref(), Some("sim-1"));
        assert!(args.encrypt && args.decrypt);
        assert_eq!(args.input, PathBuf::from("notes.txt"));
        assert_eq!(args.output, Some(PathBuf::from("out")));
        assert_eq!(args.password.as_deref(), Some("pw"));
    }

    #[test]
    fn input_is_required() {
        let err = Args::try_parse_from(["helix", "-u", "alice"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn port_must_be_numeric() {
        let err =
            Args::try_parse_from(["helix", "-u", "a", "-i", "x", "--port", "http"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn help_is_not_a_failure() {
        let err = Args::try_parse_from(["helix", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
