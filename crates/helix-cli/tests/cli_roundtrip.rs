#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Runs the CLI pipeline against an in-process key server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use clap::Parser;
use helix_cli::{Args, ExitStatus, run};
use helix_crypto::IdentityKeyPair;
use helix_keyserver::{KeyServer, KeyServerOptions};
use tokio::sync::watch;

struct Server {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl Server {
    fn start() -> Self {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let server = KeyServer::bind(
                    "127.0.0.1:0",
                    Arc::new(IdentityKeyPair::generate()),
                    KeyServerOptions::default(),
                )
                .await
                .unwrap();
                ready_tx.send(server.local_addr().unwrap()).unwrap();
                server.run(shutdown_rx).await;
            });
        });
        Self {
            addr: ready_rx.recv().unwrap(),
            shutdown,
            thread: Some(thread),
        }
    }

    fn args(&self, data_dir: &Path, extra: &[&str]) -> Args {
        let port = self.addr.port().to_string();
        let data_dir = data_dir.to_str().unwrap();
        let mut argv = vec![
            "helix",
            "-s",
            "127.0.0.1",
            "--port",
            port.as_str(),
            "-f",
            "cli-test-device",
            "--data-dir",
            data_dir,
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[test]
fn encrypt_then_decrypt_writes_both_files() {
    let server = Server::start();
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("notes.txt");
    std::fs::write(&input, b"ten bytes!").unwrap();
    let base = work.path().join("notes");

    let report = run(&server.args(
        state.path(),
        &[
            "-u",
            "alice",
            "-e",
            "-d",
            "-i",
            input.to_str().unwrap(),
            "-o",
            base.to_str().unwrap(),
        ],
    ))
    .unwrap();

    assert_eq!(report.input_bytes, 10);
    let (encrypted, sealed_len) = report.encrypted.unwrap();
    let (decrypted, plain_len) = report.decrypted.unwrap();
    assert_eq!(encrypted, work.path().join("notes-encrypted"));
    assert_eq!(decrypted, work.path().join("notes-decrypted"));
    assert!(sealed_len > plain_len);
    assert_eq!(std::fs::read(&decrypted).unwrap(), b"ten bytes!");
    assert_eq!(std::fs::read(&encrypted).unwrap().len(), sealed_len);
}

#[test]
fn envelope_file_decrypts_in_a_later_run() {
    let server = Server::start();
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("msg");
    std::fs::write(&input, b"later").unwrap();
    let base = work.path().join("msg");

    run(&server.args(
        state.path(),
        &[
            "-u",
            "bob",
            "-e",
            "-p",
            "pw",
            "-i",
            input.to_str().unwrap(),
            "-o",
            base.to_str().unwrap(),
        ],
    ))
    .unwrap();

    let sealed = work.path().join("msg-encrypted");
    let report = run(&server.args(
        state.path(),
        &[
            "-u",
            "bob",
            "-d",
            "-p",
            "pw",
            "-i",
            sealed.to_str().unwrap(),
            "-o",
            base.to_str().unwrap(),
        ],
    ))
    .unwrap();
    assert!(report.encrypted.is_none());
    assert_eq!(std::fs::read(work.path().join("msg-decrypted")).unwrap(), b"later");

    let err = run(&server.args(
        state.path(),
        &[
            "-u",
            "bob",
            "-d",
            "-p",
            "wrong",
            "-i",
            sealed.to_str().unwrap(),
            "-o",
            base.to_str().unwrap(),
        ],
    ))
    .unwrap_err();
    assert_eq!(err.status, ExitStatus::DecryptStatus);
}

#[test]
fn missing_input_exits_with_input_name() {
    let server = Server::start();
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let missing = work.path().join("absent");

    let err = run(&server.args(
        state.path(),
        &["-u", "carol", "-e", "-i", missing.to_str().unwrap()],
    ))
    .unwrap_err();
    assert_eq!(err.status, ExitStatus::InputName);
}

#[test]
fn empty_input_cannot_be_encrypted() {
    let server = Server::start();
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("empty");
    std::fs::write(&input, b"").unwrap();
    let base = work.path().join("empty");

    let err = run(&server.args(
        state.path(),
        &[
            "-u",
            "dave",
            "-e",
            "-i",
            input.to_str().unwrap(),
            "-o",
            base.to_str().unwrap(),
        ],
    ))
    .unwrap_err();
    assert_eq!(err.status, ExitStatus::EncryptEmpty);
}

#[test]
fn unreachable_server_exits_with_server() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port().to_string()
    };
    let state = tempfile::tempdir().unwrap();
    let args = Args::try_parse_from([
        "helix",
        "-s",
        "127.0.0.1",
        "--port",
        port.as_str(),
        "-f",
        "cli-test-device",
        "--data-dir",
        state.path().to_str().unwrap(),
        "-u",
        "erin",
        "-e",
        "-i",
        "whatever",
    ])
    .unwrap();
    assert_eq!(run(&args).unwrap_err().status, ExitStatus::Server);
}

#[test]
fn invalid_port_is_a_syntax_error() {
    let state = tempfile::tempdir().unwrap();
    let args = Args::try_parse_from([
        "helix",
        "-s",
        "127.0.0.1",
        "--port",
        "0",
        "--data-dir",
        state.path().to_str().unwrap(),
        "-u",
        "erin",
        "-i",
        "whatever",
    ])
    .unwrap();
    assert_eq!(run(&args).unwrap_err().status, ExitStatus::Syntax);
}
