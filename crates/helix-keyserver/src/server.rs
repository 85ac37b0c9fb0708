//! TCP front end for the directory.
//!
//! Each accepted connection runs the channel handshake and then serves
//! requests in order, except searches: those run as their own tasks so a slow
//! lookup never holds up the rest of the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use helix_crypto::{IdentityKeyPair, PublicIdentity};
use helix_proto::channel::server_handshake;
use helix_proto::{
    ErrorCode, ProtoError, Request, RequestBody, Response, ResponseBody, SearchQuery,
};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::directory::Directory;

/// Responses queued per connection before request handling waits.
const RESPONSE_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct KeyServerOptions {
    /// Announced to clients in the handshake.
    pub server_id: String,
    /// Artificial latency added to every search.
    pub search_delay: Duration,
}

impl Default for KeyServerOptions {
    fn default() -> Self {
        Self {
            server_id: "helix-keyserver".to_string(),
            search_delay: Duration::ZERO,
        }
    }
}

struct ServerState {
    identity: Arc<IdentityKeyPair>,
    options: KeyServerOptions,
    directory: RwLock<Directory>,
}

/// Per-connection login state.
struct ClientSession {
    peer: SocketAddr,
    device_id: String,
    account: Option<String>,
}

pub struct KeyServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl KeyServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        identity: Arc<IdentityKeyPair>,
        options: KeyServerOptions,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                identity,
                options,
                directory: RwLock::new(Directory::new()),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn fingerprint(&self) -> String {
        self.state.identity.fingerprint()
    }

    pub async fn account_count(&self) -> usize {
        self.state.directory.read().await.len()
    }

    /// Accept connections until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            addr = ?self.listener.local_addr().ok(),
            server_id = %self.state.options.server_id,
            fingerprint = %self.fingerprint(),
            "Key server listening"
        );
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                () = stopped(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&self.state);
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            if let Err(e) = serve(stream, peer, state, shutdown).await {
                                debug!(%peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        connections.shutdown().await;
        info!("Key server stopped");
    }
}

#[instrument(skip_all, fields(%peer))]
async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ProtoError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let ((mut reader, mut writer), hello) = server_handshake(
        stream,
        Arc::clone(&state.identity),
        &state.options.server_id,
    )
    .await?;
    info!(device_id = %hello.device_id, "Client connected");

    let (tx, mut rx) = mpsc::channel::<Response>(RESPONSE_QUEUE);
    let writer_task = tokio::spawn(async move {
        while let Some(resp) = rx.recv().await {
            if let Err(e) = writer.send(&resp).await {
                debug!(error = %e, "Write to client failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut session = ClientSession {
        peer,
        device_id: hello.device_id,
        account: None,
    };
    let mut searches = JoinSet::new();

    let result = loop {
        let req = tokio::select! {
            () = stopped(&mut shutdown) => break Ok(()),
            req = reader.recv::<Request>() => req,
        };
        let req = match req {
            Ok(Some(req)) => req,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        while searches.try_join_next().is_some() {}

        debug!(request_id = req.id, op = req.body.op(), "Request");
        match req.body {
            RequestBody::Search { query } => {
                if session.account.is_none() {
                    let body = error(ErrorCode::NotLoggedIn, "log in before searching");
                    if tx.send(Response { id: req.id, body }).await.is_err() {
                        break Ok(());
                    }
                    continue;
                }
                let state = Arc::clone(&state);
                let tx = tx.clone();
                searches.spawn(async move {
                    let delay = state.options.search_delay;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let body = search(&state, &query).await;
                    let _ = tx.send(Response { id: req.id, body }).await;
                });
            }
            body => {
                let body = handle(&state, &mut session, body).await;
                if tx.send(Response { id: req.id, body }).await.is_err() {
                    break Ok(());
                }
            }
        }
    };

    searches.shutdown().await;
    drop(tx);
    let _ = writer_task.await;
    info!(peer = %session.peer, account = ?session.account, "Client disconnected");
    result
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn error(code: ErrorCode, message: impl Into<String>) -> ResponseBody {
    ResponseBody::Error {
        code,
        message: message.into(),
    }
}

fn parse_key(hex: &str) -> Result<PublicIdentity, ResponseBody> {
    PublicIdentity::from_hex(hex)
        .map_err(|e| error(ErrorCode::InvalidRequest, format!("bad public key: {e}")))
}

async fn handle(
    state: &ServerState,
    session: &mut ClientSession,
    body: RequestBody,
) -> ResponseBody {
    match body {
        RequestBody::AccountCreate {
            name,
            email,
            public_key,
        } => {
            let key = match parse_key(&public_key) {
                Ok(key) => key,
                Err(reply) => return reply,
            };
            let mut directory = state.directory.write().await;
            match directory.create(&name, email.as_deref(), key, &session.device_id) {
                Ok(()) => ResponseBody::Ok,
                Err(e) => error(e.code(), e.to_string()),
            }
        }
        RequestBody::AccountLogin { name, public_key } => {
            let key = match parse_key(&public_key) {
                Ok(key) => key,
                Err(reply) => return reply,
            };
            let directory = state.directory.read().await;
            match directory.login(&name, &key) {
                Ok(_) => {
                    info!(account = %name, "Logged in");
                    session.account = Some(name);
                    ResponseBody::Ok
                }
                Err(e) => error(e.code(), e.to_string()),
            }
        }
        RequestBody::AccountDelete { name, public_key } => {
            let key = match parse_key(&public_key) {
                Ok(key) => key,
                Err(reply) => return reply,
            };
            let mut directory = state.directory.write().await;
            match directory.delete(&name, &key) {
                Ok(_) => {
                    if session.account.as_deref() == Some(name.as_str()) {
                        session.account = None;
                    }
                    ResponseBody::Ok
                }
                Err(e) => error(e.code(), e.to_string()),
            }
        }
        RequestBody::Ping => ResponseBody::Pong,
        RequestBody::Search { .. } => error(ErrorCode::Internal, "search routed to handler"),
    }
}

async fn search(state: &ServerState, query: &SearchQuery) -> ResponseBody {
    let directory = state.directory.read().await;
    let found = match query {
        SearchQuery::Name(name) => directory.find_by_name(name),
        SearchQuery::Email(email) => directory.find_by_email(email),
    };
    match found {
        Some(account) => ResponseBody::Found {
            entry: account.to_entry(),
        },
        None => {
            debug!(?query, "Search found nothing");
            ResponseBody::NotFound
        }
    }
}
