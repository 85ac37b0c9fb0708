//! One encrypt and/or decrypt run.
//!
//! Start a session, connect, authenticate as the user (creating the account
//! when needed), then seal the input to the user's own identity and/or open
//! an envelope. The session is always shut down, whether or not a step
//! failed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use helix_client::{
    CryptoOperationError, EngineBuffer, Error, InputBuffer, Ownership, OutputBuffer, PromiseId,
    Session, StartupOptions, Timeout,
};
use helix_core::Config;
use helix_core::config::load_config;
use tracing::{info, warn};

use crate::args::Args;
use crate::error::{CliError, ExitStatus};
use crate::files::{OutputPaths, read_input, write_output};

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub input_bytes: usize,
    /// Envelope path and size.
    pub encrypted: Option<(PathBuf, usize)>,
    /// Plaintext path and size.
    pub decrypted: Option<(PathBuf, usize)>,
}

/// Resolve configuration from the config layers and `args`.
pub fn resolve_config(args: &Args) -> Result<Config, CliError> {
    let mut config = load_config(args.config.as_deref())
        .map_err(|e| CliError::new(ExitStatus::Syntax, e.to_string()))?;
    if let Some(server) = &args.server {
        config.server.address.clone_from(server);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = &args.data_dir {
        config.client.data_dir = Some(dir.clone());
    }
    Ok(config)
}

pub fn run(args: &Args) -> Result<Report, CliError> {
    let config = resolve_config(args)?;
    let mut options = StartupOptions::from_config(&config);
    if let Some(device) = &args.simulated_device {
        options = options.simulated_device(device.clone());
    }

    let session = Session::startup(options)
        .map_err(|e| CliError::from_client(&e.into(), ExitStatus::Module))?;
    let result = run_with(&session, args, &config);

    let summary = session.shutdown();
    if summary.outstanding_promises > 0 {
        warn!(
            outstanding = summary.outstanding_promises,
            "Promises left outstanding at shutdown"
        );
    }
    result
}

fn run_with(session: &Session, args: &Args, config: &Config) -> Result<Report, CliError> {
    session
        .connect()
        .map_err(|e| CliError::from_client(&e.into(), ExitStatus::Server))?;
    session
        .authenticate(&args.user)
        .map_err(|e| CliError::from_client(&e, ExitStatus::Account))?;

    let paths = OutputPaths::new(&args.input, args.output.as_deref())?;
    let input: Arc<[u8]> = read_input(&args.input)?.into();
    info!(path = %args.input.display(), bytes = input.len(), "Read input");

    let mut report = Report {
        input_bytes: input.len(),
        ..Report::default()
    };
    let password = args.password.as_deref();

    let sealed = if args.encrypt {
        let envelope = encrypt_to_self(
            session,
            &args.user,
            &input,
            password,
            Timeout::After(config.client.search_timeout()),
        )?;
        write_output(&paths.encrypted, &envelope)?;
        announce(&paths.encrypted, envelope.len());
        report.encrypted = Some((paths.encrypted.clone(), envelope.len()));
        Some(envelope)
    } else {
        None
    };

    let decrypted = args
        .decrypt
        .then(|| decrypt_to_file(session, &paths, &input, sealed.as_ref(), password));

    if let Some(envelope) = sealed {
        session
            .conclude(envelope.promise())
            .map_err(|e| CliError::from_client(&e, ExitStatus::OwnershipViolation))?;
    }
    report.decrypted = decrypted.transpose()?;
    Ok(report)
}

/// Open `sealed`, or the input itself when nothing was encrypted this run,
/// and write the plaintext out.
fn decrypt_to_file(
    session: &Session,
    paths: &OutputPaths,
    input: &Arc<[u8]>,
    sealed: Option<&EngineBuffer>,
    password: Option<&str>,
) -> Result<(PathBuf, usize), CliError> {
    let blob = match sealed {
        Some(envelope) => InputBuffer::EngineCopy(envelope),
        None => InputBuffer::CallerOwned(Arc::clone(input)),
    };
    let envelope_bytes = blob.len();
    let plaintext = decrypt(session, blob, password)?;
    info!(
        envelope_bytes,
        plaintext_bytes = plaintext.len(),
        "Decryption succeeded"
    );
    write_output(&paths.decrypted, plaintext.as_slice())?;
    announce(&paths.decrypted, plaintext.len());

    if sealed.is_some() {
        plaintext.expect_len(input.len()).map_err(|e| {
            CliError::new(
                ExitStatus::DecryptSize,
                format!("decrypted size differs from the original: {e}"),
            )
        })?;
    }
    Ok((paths.decrypted.clone(), plaintext.len()))
}

/// Look up the user's own identity and seal `plaintext` to it. The envelope
/// stays engine-owned until the caller concludes its promise.
fn encrypt_to_self(
    session: &Session,
    user: &str,
    plaintext: &[u8],
    password: Option<&str>,
    search_timeout: Timeout,
) -> Result<EngineBuffer, CliError> {
    let recipient_failed = |e| CliError::from_client(&e, ExitStatus::EncryptRecipient);

    let search = session
        .resolve_by_name(user, search_timeout)
        .map_err(recipient_failed)?;
    let status = session.wait(search, search_timeout).map_err(recipient_failed)?;
    if !status.has_data() {
        let reason = session
            .resolved_identity(search)
            .err()
            .map_or_else(|| status.to_string(), |e| e.to_string());
        settle(search, session.release(search));
        return Err(CliError::new(
            ExitStatus::EncryptRecipient,
            format!("could not find account {user}: {reason}"),
        ));
    }
    let recipient = session.resolved_identity(search).map_err(recipient_failed)?;

    let sealed = session.encrypt(&recipient, plaintext, password, Ownership::Engine);
    let outcome = wait_and_take(
        session,
        sealed,
        ExitStatus::EncryptEmpty,
        ExitStatus::EncryptEmpty,
    );
    if outcome.is_err() {
        settle(sealed, session.conclude(sealed));
    }
    session
        .release(search)
        .map_err(|e| CliError::from_client(&e, ExitStatus::OwnershipViolation))?;

    match outcome? {
        OutputBuffer::Engine(envelope) => Ok(envelope),
        OutputBuffer::Caller(_) => Err(CliError::new(
            ExitStatus::EncryptEmpty,
            "envelope was not engine-owned",
        )),
    }
}

fn decrypt(
    session: &Session,
    blob: InputBuffer<'_>,
    password: Option<&str>,
) -> Result<OutputBuffer, CliError> {
    let opened = session
        .decrypt(blob, password, Ownership::Caller)
        .map_err(|e| CliError::from_client(&e, ExitStatus::Account))?;
    let plaintext = wait_and_take(
        session,
        opened,
        ExitStatus::DecryptStatus,
        ExitStatus::DecryptEmpty,
    );
    settle(opened, session.conclude(opened));
    let plaintext = plaintext?;
    if plaintext.is_empty() {
        return Err(CliError::new(ExitStatus::DecryptEmpty, "decryption produced no data"));
    }
    Ok(plaintext)
}

/// Wait for a crypto promise and take its output. The promise is left for
/// the caller to conclude.
fn wait_and_take(
    session: &Session,
    id: PromiseId,
    failed: ExitStatus,
    empty: ExitStatus,
) -> Result<OutputBuffer, CliError> {
    let status = session
        .wait(id, Timeout::Infinite)
        .map_err(|e| CliError::from_client(&e, failed))?;
    if !status.has_data() {
        let reason = session
            .output(id)
            .err()
            .map_or_else(|| status.to_string(), |e| e.to_string());
        return Err(CliError::new(failed, reason));
    }
    session.output(id).map_err(|e| match e {
        Error::Crypto(CryptoOperationError::EmptyResult) => {
            CliError::new(empty, e.to_string())
        }
        other => CliError::from_client(&other, failed),
    })
}

/// Log a failed release or conclude on a path that already reports another
/// error. Returns whether the promise was let go cleanly.
fn settle(id: PromiseId, released: Result<(), Error>) -> bool {
    match released {
        Ok(()) => true,
        Err(e) => {
            warn!(promise = %id, error = %e, "Promise was not released");
            false
        }
    }
}

fn announce(path: &Path, bytes: usize) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "wrote {bytes} bytes to '{}'", path.display());
}
