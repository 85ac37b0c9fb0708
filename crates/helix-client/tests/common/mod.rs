#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Shared fixtures: an in-process key server and session builders.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use helix_client::{Session, StartupOptions};
use helix_crypto::IdentityKeyPair;
use helix_keyserver::{KeyServer, KeyServerOptions};
use tokio::sync::watch;

/// Key server running on its own thread and runtime, stopped on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub fingerprint: String,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::with_options(KeyServerOptions::default())
    }

    pub fn with_search_delay(delay: Duration) -> Self {
        Self::with_options(KeyServerOptions {
            search_delay: delay,
            ..KeyServerOptions::default()
        })
    }

    pub fn with_options(options: KeyServerOptions) -> Self {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let identity = Arc::new(IdentityKeyPair::generate());
                let server = KeyServer::bind("127.0.0.1:0", identity, options)
                    .await
                    .unwrap();
                ready_tx
                    .send((server.local_addr().unwrap(), server.fingerprint()))
                    .unwrap();
                server.run(shutdown_rx).await;
            });
        });
        let (addr, fingerprint) = ready_rx.recv().expect("key server failed to start");
        Self {
            addr,
            fingerprint,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn options(&self, data_dir: &Path, device: &str) -> StartupOptions {
        StartupOptions::new(self.addr.ip().to_string(), self.addr.port())
            .data_dir(data_dir)
            .simulated_device(device)
            .connect_timeout(Duration::from_secs(5))
            .request_timeout(Duration::from_secs(5))
    }

    /// Started and connected session for `device`.
    pub fn session(&self, data_dir: &Path, device: &str) -> Session {
        let session = Session::startup(self.options(data_dir, device)).unwrap();
        session.connect().unwrap();
        session
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
