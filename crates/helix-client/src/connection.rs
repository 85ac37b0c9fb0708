//! Long-lived connection to the key server.
//!
//! After the handshake the channel is split into a reader task and a writer
//! task. Requests carry a numeric id; the caller parks on a oneshot keyed by
//! that id until the reader task routes the matching response back.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use helix_crypto::{KnownServers, PinCheck};
use helix_proto::channel::client_handshake;
use helix_proto::{
    ChannelReader, ChannelWriter, Request, RequestBody, Response, ResponseBody, ServerInfo,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;

type Pending = Arc<RwLock<HashMap<u64, oneshot::Sender<ResponseBody>>>>;

/// Outbound queue depth; senders wait when the writer falls behind.
const OUTBOUND_CAPACITY: usize = 64;

/// Everything needed to reach and pin a key server.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub device_id: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Trust-on-first-use store for server identities.
    pub known_servers: PathBuf,
}

impl ConnectParams {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct KeyServerConnection {
    address: String,
    server: ServerInfo,
    outbound: mpsc::Sender<Request>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    request_timeout: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for KeyServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyServerConnection")
            .field("address", &self.address)
            .field("server_id", &self.server.server_id)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl KeyServerConnection {
    /// Connect, run the handshake, pin the server identity and confirm the
    /// channel with a ping.
    pub async fn open(params: &ConnectParams) -> Result<Arc<Self>, ConnectionError> {
        let address = params.address();
        info!(%address, "Connecting to key server");

        let stream = match tokio::time::timeout(
            params.connect_timeout,
            TcpStream::connect(&address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectionError::ServerUnreachable {
                    address,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ConnectionError::ServerUnreachable {
                    address,
                    reason: format!("connect timed out after {:?}", params.connect_timeout),
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let ((reader, writer), server) = tokio::time::timeout(
            params.request_timeout,
            client_handshake(stream, &params.device_id),
        )
        .await
        .map_err(|_| ConnectionError::HandshakeFailed("handshake timed out".to_string()))?
        .map_err(|e| ConnectionError::HandshakeFailed(e.to_string()))?;

        pin_server(params, &address, &server)?;

        let conn = Arc::new(Self::spawn(address, server, reader, writer, params.request_timeout));
        if let Err(e) = conn.ping().await {
            conn.close().await;
            return Err(ConnectionError::HandshakeFailed(format!(
                "channel confirmation failed: {e}"
            )));
        }
        info!(
            address = %conn.address,
            server_id = %conn.server.server_id,
            "Connected to key server"
        );
        Ok(conn)
    }

    fn spawn<R, W>(
        address: String,
        server: ServerInfo,
        reader: ChannelReader<R>,
        writer: ChannelWriter<W>,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pending: Pending = Arc::new(RwLock::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&alive),
            shutdown_rx.clone(),
        ));
        let writer_task = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            Arc::clone(&pending),
            Arc::clone(&alive),
            shutdown_rx,
        ));

        Self {
            address,
            server,
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            request_timeout,
            shutdown,
            tasks: Mutex::new(vec![reader_task, writer_task]),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub const fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Whether both halves of the channel are still running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Send `body` and wait up to the configured request timeout.
    pub async fn request(&self, body: RequestBody) -> Result<ResponseBody, ConnectionError> {
        self.request_within(body, Some(self.request_timeout)).await
    }

    /// Send `body` and wait up to `limit`, or until the connection closes
    /// when `limit` is `None`.
    pub async fn request_within(
        &self,
        body: RequestBody,
        limit: Option<Duration>,
    ) -> Result<ResponseBody, ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = body.op();
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        // The reader may have drained the map between the liveness check
        // and the insert above.
        if !self.is_alive() || self.outbound.send(Request { id, body }).await.is_err() {
            self.pending.write().await.remove(&id);
            return Err(ConnectionError::Closed);
        }
        debug!(request_id = id, op, "Request sent");

        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.write().await.remove(&id);
                    debug!(request_id = id, op, ?limit, "Request timed out");
                    return Err(ConnectionError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| ConnectionError::Closed)
    }

    /// Round-trip a ping.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        match self.request(RequestBody::Ping).await? {
            ResponseBody::Pong => Ok(()),
            other => Err(ConnectionError::Protocol(format!(
                "unexpected reply to ping: {other:?}"
            ))),
        }
    }

    /// Stop both tasks and fail every pending request. Returns once the
    /// tasks have exited.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection task panicked");
            }
        }
        self.alive.store(false, Ordering::Release);
        let dropped = {
            let mut pending = self.pending.write().await;
            let n = pending.len();
            pending.clear();
            n
        };
        info!(address = %self.address, dropped, "Disconnected from key server");
    }
}

fn pin_server(
    params: &ConnectParams,
    address: &str,
    server: &ServerInfo,
) -> Result<(), ConnectionError> {
    let path = &params.known_servers;
    let mut known = KnownServers::load(path).map_err(|e| {
        ConnectionError::HandshakeFailed(format!("cannot read {}: {e}", path.display()))
    })?;
    let fingerprint = server.identity.fingerprint();

    match known.check(address, &fingerprint) {
        PinCheck::Mismatch { expected, actual } => {
            warn!(%address, %expected, %actual, "Key server identity changed");
            return Err(ConnectionError::HandshakeFailed(format!(
                "identity of {address} does not match the pinned key (expected {expected}, got {actual})"
            )));
        }
        PinCheck::TrustOnFirstUse => {
            info!(%address, %fingerprint, "Pinning key server identity on first use");
        }
        PinCheck::Matched => {}
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
    known.record(address, &server.server_id, &fingerprint, now);
    if let Err(e) = known.save(path) {
        warn!(error = %e, path = %path.display(), "Failed to save known servers");
    }
    Ok(())
}

async fn read_loop<R>(
    mut reader: ChannelReader<R>,
    pending: Pending,
    alive: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = reader.recv::<Response>() => match msg {
                Ok(Some(resp)) => {
                    let waiter = pending.write().await.remove(&resp.id);
                    match waiter {
                        Some(tx) => {
                            // The caller may have timed out and gone away.
                            let _ = tx.send(resp.body);
                        }
                        None => debug!(request_id = resp.id, "Response for unknown request"),
                    }
                }
                Ok(None) => {
                    info!("Key server closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Key server read failed");
                    break;
                }
            }
        }
    }
    alive.store(false, Ordering::Release);
    pending.write().await.clear();
}

async fn write_loop<W>(
    mut writer: ChannelWriter<W>,
    mut outbound: mpsc::Receiver<Request>,
    pending: Pending,
    alive: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            req = outbound.recv() => match req {
                Some(req) => {
                    if let Err(e) = writer.send(&req).await {
                        warn!(error = %e, request_id = req.id, "Key server write failed");
                        break;
                    }
                }
                None => break,
            }
        }
    }
    alive.store(false, Ordering::Release);
    pending.write().await.clear();
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Channel shutdown failed");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use helix_crypto::IdentityKeyPair;
    use helix_proto::channel::server_handshake;

    use super::*;

    /// In-process server that answers pings and ignores everything else.
    fn spawn_conn(
        identity: Arc<IdentityKeyPair>,
    ) -> (tokio::task::JoinHandle<()>, tokio::io::DuplexStream) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let ((mut rx, mut tx), _) = server_handshake(server_io, identity, "srv-test")
                .await
                .unwrap();
            while let Ok(Some(req)) = rx.recv::<Request>().await {
                if req.body == RequestBody::Ping {
                    tx.send(&Response {
                        id: req.id,
                        body: ResponseBody::Pong,
                    })
                    .await
                    .unwrap();
                }
            }
        });
        (server, client_io)
    }

    async fn connect(client_io: tokio::io::DuplexStream) -> KeyServerConnection {
        let ((reader, writer), info) = client_handshake(client_io, "dev").await.unwrap();
        KeyServerConnection::spawn(
            "test:1".into(),
            info,
            reader,
            writer,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn ping_round_trips() {
        let (server, io) = spawn_conn(Arc::new(IdentityKeyPair::generate()));
        let conn = connect(io).await;
        conn.ping().await.unwrap();
        conn.ping().await.unwrap();
        assert!(conn.is_alive());
        conn.close().await;
        assert!(!conn.is_alive());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let (_server, io) = spawn_conn(Arc::new(IdentityKeyPair::generate()));
        let conn = connect(io).await;
        let err = conn
            .request_within(
                RequestBody::AccountLogin {
                    name: "x".into(),
                    public_key: String::new(),
                },
                Some(Duration::from_millis(30)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ConnectionError::Timeout(Duration::from_millis(30)));
        assert!(conn.pending.read().await.is_empty());
        conn.close().await;
    }

    #[tokio::test]
    async fn close_fails_inflight_requests() {
        let (_server, io) = spawn_conn(Arc::new(IdentityKeyPair::generate()));
        let conn = Arc::new(connect(io).await);

        let waiter = Arc::clone(&conn);
        let inflight = tokio::spawn(async move {
            waiter
                .request_within(
                    RequestBody::Search {
                        query: helix_proto::SearchQuery::Name("nobody".into()),
                    },
                    None,
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await;

        assert_eq!(inflight.await.unwrap(), Err(ConnectionError::Closed));
        assert_eq!(conn.ping().await, Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn server_hangup_marks_connection_dead() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let identity = Arc::new(IdentityKeyPair::generate());
        let server = tokio::spawn(async move {
            let (halves, _) = server_handshake(server_io, identity, "srv").await.unwrap();
            drop(halves);
        });
        let conn = connect(client_io).await;
        server.await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while conn.is_alive() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(conn.ping().await, Err(ConnectionError::Closed));
        conn.close().await;
    }

    #[test]
    fn pin_mismatch_fails_handshake() {
        let tmp = tempfile::tempdir().unwrap();
        let params = ConnectParams {
            host: "keys.test".into(),
            port: 5567,
            device_id: "dev".into(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            known_servers: tmp.path().join("known_servers.json"),
        };
        let first = ServerInfo {
            server_id: "srv".into(),
            identity: IdentityKeyPair::generate().public_identity(),
        };
        pin_server(&params, &params.address(), &first).unwrap();
        pin_server(&params, &params.address(), &first).unwrap();

        let impostor = ServerInfo {
            server_id: "srv".into(),
            identity: IdentityKeyPair::generate().public_identity(),
        };
        assert!(matches!(
            pin_server(&params, &params.address(), &impostor),
            Err(ConnectionError::HandshakeFailed(_))
        ));
    }
}
