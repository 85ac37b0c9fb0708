//! Session manager.
//!
//! A [`Session`] owns everything the client needs: its own tokio runtime,
//! the promise registry, the connection to the key server and the local
//! account store. Blocking methods drive the runtime with `block_on` and must
//! not be called from inside an async context; use [`Session::wait_async`]
//! there.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use helix_core::Config;
use helix_core::config::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_WORKER_THREADS,
    default_data_dir,
};
use helix_crypto::{EnvelopeHeader, IdentityKeyPair};
use helix_proto::{ErrorCode, RequestBody, ResponseBody};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::account::{AccountStore, AuthState, validate_account_name};
use crate::buffer::{InputBuffer, OutputBuffer, Ownership};
use crate::connection::{ConnectParams, KeyServerConnection};
use crate::device::Device;
use crate::directory::{self, Query, ResolvedIdentity};
use crate::engine::CryptoEngine;
use crate::error::{
    AuthError, ConnectionError, OwnershipViolation, ResolutionError, Result, StartupError,
};
use crate::promise::{Failure, Outcome, PromiseId, PromiseKind, PromiseRegistry};
use crate::status::{PromiseStatus, Timeout};

const MAX_SERVER_ADDRESS_LEN: usize = 128;
const KNOWN_SERVERS_FILE: &str = "known_servers.json";
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Parameters for [`Session::startup`].
#[derive(Debug, Clone)]
pub struct StartupOptions {
    address: String,
    port: u16,
    simulated_device: Option<String>,
    flags: u64,
    data_dir: Option<PathBuf>,
    connect_timeout: Duration,
    request_timeout: Duration,
    worker_threads: usize,
}

impl StartupOptions {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            simulated_device: None,
            flags: 0,
            data_dir: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    /// Start from a resolved configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut options = Self::new(config.server.address.clone(), config.server.port)
            .connect_timeout(config.client.connect_timeout())
            .request_timeout(config.client.request_timeout())
            .worker_threads(config.client.worker_threads);
        options.data_dir = config.client.resolved_data_dir();
        options
    }

    /// Run as a simulated device with the given identifier.
    #[must_use]
    pub fn simulated_device(mut self, id: impl Into<String>) -> Self {
        self.simulated_device = Some(id.into());
        self
    }

    /// Reserved startup flags, carried as given.
    #[must_use]
    pub const fn flags(mut self, flags: u64) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Longest the key server may take to answer a request.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    fn validate(&self) -> std::result::Result<(), StartupError> {
        if self.address.is_empty() || self.address.len() >= MAX_SERVER_ADDRESS_LEN {
            return Err(StartupError::InvalidServerAddress(self.address.clone()));
        }
        if self.port == 0 || self.port == u16::MAX {
            return Err(StartupError::InvalidPort(self.port));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loaded,
    ShuttingDown,
}

/// What [`Session::shutdown`] found on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Promises that were never released or concluded.
    pub outstanding_promises: usize,
    pub was_connected: bool,
}

struct Link {
    state: ConnectionState,
    conn: Option<Arc<KeyServerConnection>>,
    searches: JoinSet<()>,
}

#[derive(Default)]
struct AuthBook {
    states: HashMap<String, AuthState>,
    active: Option<(String, Arc<IdentityKeyPair>)>,
}

impl AuthBook {
    fn set(&mut self, name: &str, state: AuthState) {
        self.states.insert(name.to_string(), state);
        if state != AuthState::LoggedIn
            && self.active.as_ref().is_some_and(|(active, _)| active == name)
        {
            self.active = None;
        }
    }

    fn log_in(&mut self, name: &str, identity: Arc<IdentityKeyPair>) {
        self.states.insert(name.to_string(), AuthState::LoggedIn);
        if let Some((previous, _)) = &self.active
            && previous != name
        {
            self.states.insert(previous.clone(), AuthState::Unknown);
        }
        self.active = Some((name.to_string(), identity));
    }

    fn clear_logins(&mut self) {
        for state in self.states.values_mut() {
            if *state == AuthState::LoggedIn {
                *state = AuthState::Unknown;
            }
        }
        self.active = None;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A Helix client session.
pub struct Session {
    options: StartupOptions,
    device: Device,
    data_dir: PathBuf,
    runtime: Runtime,
    registry: Arc<PromiseRegistry>,
    engine: CryptoEngine,
    accounts: AccountStore,
    /// Serializes connect and disconnect.
    lifecycle: Mutex<()>,
    link: Mutex<Link>,
    auth: Mutex<AuthBook>,
    module_state: Mutex<ModuleState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.options.address)
            .field("port", &self.options.port)
            .field("device", &self.device)
            .field("connection_state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Validate `options`, resolve the device identity and start the runtime.
    pub fn startup(options: StartupOptions) -> std::result::Result<Self, StartupError> {
        options.validate()?;

        let data_dir = options
            .data_dir
            .clone()
            .or_else(default_data_dir)
            .ok_or_else(|| {
                StartupError::ModuleStartup("no data directory available".to_string())
            })?;
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            StartupError::ModuleStartup(format!(
                "cannot create data directory {}: {e}",
                data_dir.display()
            ))
        })?;

        let device = match &options.simulated_device {
            Some(id) => Device::simulated(id)?,
            None => Device::real(&data_dir)?,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.worker_threads)
            .thread_name("helix-worker")
            .enable_all()
            .build()
            .map_err(|e| StartupError::ModuleStartup(format!("cannot start runtime: {e}")))?;

        let registry = Arc::new(PromiseRegistry::new());
        let engine = CryptoEngine::new(Arc::clone(&registry), runtime.handle().clone());
        let accounts = AccountStore::new(&data_dir, &device.id());

        info!(
            server = %options.address,
            port = options.port,
            device = %device,
            simulated = device.is_simulated(),
            flags = options.flags,
            data_dir = %data_dir.display(),
            "Helix session started"
        );

        Ok(Self {
            options,
            device,
            data_dir,
            runtime,
            registry,
            engine,
            accounts,
            lifecycle: Mutex::new(()),
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                conn: None,
                searches: JoinSet::new(),
            }),
            auth: Mutex::new(AuthBook::default()),
            module_state: Mutex::new(ModuleState::Loaded),
        })
    }

    // -- Connection --------------------------------------------------------

    /// Open the secure channel to the key server. A no-op when already
    /// connected.
    pub fn connect(&self) -> std::result::Result<(), ConnectionError> {
        let _serial = lock(&self.lifecycle);

        let stale = {
            let mut link = lock(&self.link);
            match &link.conn {
                Some(conn) if conn.is_alive() => return Ok(()),
                Some(_) => link.conn.take(),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!("Closing dead key server connection");
            self.runtime.block_on(stale.close());
            lock(&self.auth).clear_logins();
        }

        lock(&self.link).state = ConnectionState::Connecting;
        let params = ConnectParams {
            host: self.options.address.clone(),
            port: self.options.port,
            device_id: self.device.id(),
            connect_timeout: self.options.connect_timeout,
            request_timeout: self.options.request_timeout,
            known_servers: self.data_dir.join(KNOWN_SERVERS_FILE),
        };
        let result = self.runtime.block_on(KeyServerConnection::open(&params));

        let mut link = lock(&self.link);
        match result {
            Ok(conn) => {
                link.conn = Some(conn);
                link.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                link.state = ConnectionState::Disconnected;
                warn!(error = %e, "Key server connection failed");
                Err(e)
            }
        }
    }

    /// Round-trip a ping to check the channel is usable.
    pub fn is_connected(&self) -> bool {
        let Some(conn) = self.current_connection() else {
            return false;
        };
        self.runtime.block_on(conn.ping()).is_ok()
    }

    /// Close the channel. Returns once every network task has stopped;
    /// searches still in flight end in `RESULT_ERROR`. Clears the logged-in
    /// account.
    pub fn disconnect(&self) {
        let _serial = lock(&self.lifecycle);
        let (conn, mut searches) = {
            let mut link = lock(&self.link);
            link.state = ConnectionState::Disconnected;
            (link.conn.take(), std::mem::take(&mut link.searches))
        };
        if conn.is_none() && searches.is_empty() {
            return;
        }
        self.runtime.block_on(async {
            if let Some(conn) = &conn {
                conn.close().await;
            }
            while searches.join_next().await.is_some() {}
        });
        lock(&self.auth).clear_logins();
    }

    pub fn connection_state(&self) -> ConnectionState {
        let link = lock(&self.link);
        match (&link.state, &link.conn) {
            (ConnectionState::Connected, Some(conn)) if !conn.is_alive() => {
                ConnectionState::Disconnected
            }
            (state, _) => *state,
        }
    }

    fn current_connection(&self) -> Option<Arc<KeyServerConnection>> {
        lock(&self.link).conn.as_ref().filter(|c| c.is_alive()).cloned()
    }

    fn require_connection(&self) -> std::result::Result<Arc<KeyServerConnection>, ConnectionError> {
        self.current_connection().ok_or(ConnectionError::NotConnected)
    }

    // -- Accounts ----------------------------------------------------------

    /// Log in as `name`, provisioning the account if login fails.
    ///
    /// Login failure discards the local record (best effort), creates the
    /// account afresh and logs in once more. There is no further retry.
    pub fn authenticate(&self, name: &str) -> Result<()> {
        self.authenticate_with_email(name, None)
    }

    pub fn authenticate_with_email(&self, name: &str, email: Option<&str>) -> Result<()> {
        validate_account_name(name)?;
        let conn = self.require_connection()?;

        let first = match self.login(&conn, name) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        info!(account = %name, reason = %first, "Login failed, re-provisioning account");

        self.discard_local(&conn, name);

        if let Err(e) = self.create(&conn, name, email) {
            lock(&self.auth).set(name, AuthState::Failed);
            return Err(e.into());
        }
        self.login(&conn, name).map_err(|e| {
            lock(&self.auth).set(name, AuthState::Failed);
            e.into()
        })
    }

    /// Register `name` on the key server with a fresh identity. Any key
    /// previously stored for this account on this device is replaced.
    pub fn account_create(&self, name: &str, email: Option<&str>) -> Result<()> {
        validate_account_name(name)?;
        let conn = self.require_connection()?;
        self.create(&conn, name, email).map_err(Into::into)
    }

    pub fn account_login(&self, name: &str) -> Result<()> {
        validate_account_name(name)?;
        let conn = self.require_connection()?;
        self.login(&conn, name).map_err(Into::into)
    }

    /// Remove `name` from the key server and drop its local key.
    pub fn account_delete(&self, name: &str) -> Result<()> {
        validate_account_name(name)?;
        let conn = self.require_connection()?;
        let failed = |reason: String| AuthError::AccountDeleteFailed {
            name: name.to_string(),
            reason,
        };

        let identity = self
            .accounts
            .load(name)
            .map_err(|e| failed(format!("no usable local key: {e}")))?;
        let reply = self
            .runtime
            .block_on(conn.request(RequestBody::AccountDelete {
                name: name.to_string(),
                public_key: identity.public_identity().to_hex(),
            }))?;
        match reply {
            ResponseBody::Ok
            | ResponseBody::Error {
                code: ErrorCode::UnknownAccount,
                ..
            } => {}
            ResponseBody::Error { code, message } => {
                return Err(failed(format!("{code}: {message}")).into());
            }
            other => return Err(failed(format!("unexpected reply: {other:?}")).into()),
        }
        self.accounts
            .remove(name)
            .map_err(|e| failed(format!("cannot remove local key: {e}")))?;
        lock(&self.auth).set(name, AuthState::Unknown);
        info!(account = %name, "Account deleted");
        Ok(())
    }

    pub fn auth_state(&self, name: &str) -> AuthState {
        lock(&self.auth)
            .states
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Account the session is currently logged in as.
    pub fn active_account(&self) -> Option<String> {
        lock(&self.auth).active.as_ref().map(|(name, _)| name.clone())
    }

    fn login(&self, conn: &KeyServerConnection, name: &str) -> std::result::Result<(), AuthError> {
        let failed = |reason: String| AuthError::AccountLoginFailed {
            name: name.to_string(),
            reason,
        };
        if !self.accounts.exists(name) {
            return Err(failed("no local key for this account".to_string()));
        }
        let identity = self
            .accounts
            .load(name)
            .map_err(|e| failed(format!("local key unreadable: {e}")))?;

        let reply = self
            .runtime
            .block_on(conn.request(RequestBody::AccountLogin {
                name: name.to_string(),
                public_key: identity.public_identity().to_hex(),
            }))
            .map_err(|e| failed(e.to_string()))?;
        match reply {
            ResponseBody::Ok => {
                lock(&self.auth).log_in(name, Arc::new(identity));
                info!(account = %name, "Logged in");
                Ok(())
            }
            ResponseBody::Error { code, message } => Err(failed(format!("{code}: {message}"))),
            other => Err(failed(format!("unexpected reply: {other:?}"))),
        }
    }

    fn create(
        &self,
        conn: &KeyServerConnection,
        name: &str,
        email: Option<&str>,
    ) -> std::result::Result<(), AuthError> {
        let failed = |reason: String| AuthError::AccountCreateFailed {
            name: name.to_string(),
            reason,
        };
        let identity = IdentityKeyPair::generate();
        // The key is on disk before the server knows about it, so a name
        // is never registered without a local record to match.
        let previous = self.accounts.load(name).ok();
        self.accounts
            .save(name, &identity)
            .map_err(|e| failed(format!("cannot store local key: {e}")))?;

        let registered = self
            .runtime
            .block_on(conn.request(RequestBody::AccountCreate {
                name: name.to_string(),
                email: email.map(str::to_string),
                public_key: identity.public_identity().to_hex(),
            }))
            .map_err(|e| failed(e.to_string()))
            .and_then(|reply| match reply {
                ResponseBody::Ok => Ok(()),
                ResponseBody::Error { code, message } => Err(failed(format!("{code}: {message}"))),
                other => Err(failed(format!("unexpected reply: {other:?}"))),
            });
        if let Err(e) = registered {
            self.restore_local(name, previous.as_ref());
            return Err(e);
        }

        lock(&self.auth).set(name, AuthState::Unknown);
        info!(account = %name, fingerprint = %identity.fingerprint(), "Account created");
        Ok(())
    }

    /// Put back the key an unsuccessful create replaced, or drop the new one.
    fn restore_local(&self, name: &str, previous: Option<&IdentityKeyPair>) {
        let restored = match previous {
            Some(identity) => self.accounts.save(name, identity),
            None => self.accounts.remove(name).map(|_| ()),
        };
        if let Err(e) = restored {
            warn!(account = %name, error = %e, "Could not roll back local key");
        }
    }

    /// Best-effort removal of an account's server and local records.
    fn discard_local(&self, conn: &KeyServerConnection, name: &str) {
        if let Ok(identity) = self.accounts.load(name) {
            let reply = self
                .runtime
                .block_on(conn.request(RequestBody::AccountDelete {
                    name: name.to_string(),
                    public_key: identity.public_identity().to_hex(),
                }));
            debug!(account = %name, ?reply, "Server-side delete attempted");
        }
        match self.accounts.remove(name) {
            Ok(true) => debug!(account = %name, "Local key discarded"),
            Ok(false) => {}
            Err(e) => debug!(account = %name, error = %e, "Local key removal failed"),
        }
    }

    // -- Directory ---------------------------------------------------------

    /// Look up a recipient by account name.
    pub fn resolve_by_name(&self, name: &str, timeout: Timeout) -> Result<PromiseId> {
        self.resolve(Query::Name(name.to_string()), timeout)
    }

    /// Look up a recipient by email address.
    pub fn resolve_by_email(&self, email: &str, timeout: Timeout) -> Result<PromiseId> {
        self.resolve(Query::Email(email.to_string()), timeout)
    }

    fn resolve(&self, query: Query, timeout: Timeout) -> Result<PromiseId> {
        let conn = self.require_connection()?;
        let id = self.registry.issue(PromiseKind::Search);

        if timeout.is_zero() {
            self.registry.complete(
                id,
                Outcome::Failed(directory::timed_out(&query, Duration::ZERO)),
            );
            return Ok(id);
        }

        let registry = Arc::clone(&self.registry);
        let mut link = lock(&self.link);
        while link.searches.try_join_next().is_some() {}
        link.searches.spawn_on(
            async move {
                registry.mark_waiting(id);
                let outcome = match directory::search(&conn, id, query, timeout).await {
                    Ok(identity) => Outcome::Resolved(identity),
                    Err(failure) => Outcome::Failed(failure),
                };
                registry.complete(id, outcome);
            },
            self.runtime.handle(),
        );
        Ok(id)
    }

    /// Identity produced by a finished search.
    pub fn resolved_identity(&self, id: PromiseId) -> Result<ResolvedIdentity> {
        self.registry
            .with_outcome(id, |kind, status, outcome| -> Result<ResolvedIdentity> {
                if kind != PromiseKind::Search {
                    return Err(OwnershipViolation::WrongKind {
                        id,
                        expected: "search",
                        actual: kind,
                    }
                    .into());
                }
                match outcome {
                    Outcome::Resolved(identity) => Ok(identity.clone()),
                    Outcome::Failed(Failure::Resolution(e)) => Err(e.clone().into()),
                    Outcome::Failed(other) => {
                        Err(ResolutionError::Failed(other.to_string()).into())
                    }
                    Outcome::Pending | Outcome::Output(_) => {
                        Err(ResolutionError::Unresolved(status).into())
                    }
                }
            })?
    }

    // -- Promises ----------------------------------------------------------

    /// Block until `id` is terminal or `timeout` elapses.
    pub fn wait(&self, id: PromiseId, timeout: Timeout) -> Result<PromiseStatus> {
        Ok(self.runtime.block_on(self.registry.wait(id, timeout))?)
    }

    /// [`wait`](Self::wait) for callers already running on a tokio runtime.
    pub async fn wait_async(&self, id: PromiseId, timeout: Timeout) -> Result<PromiseStatus> {
        Ok(self.registry.wait(id, timeout).await?)
    }

    pub fn status(&self, id: PromiseId) -> Result<PromiseStatus> {
        Ok(self.registry.status(id)?)
    }

    /// Status updates for `id`, replacing completion callbacks.
    pub fn subscribe(&self, id: PromiseId) -> Result<watch::Receiver<PromiseStatus>> {
        Ok(self.registry.subscribe(id)?)
    }

    /// Invalidate `id`. Any later use of it is an ownership violation.
    pub fn release(&self, id: PromiseId) -> Result<()> {
        Ok(self.registry.release(id)?)
    }

    pub fn outstanding(&self) -> usize {
        self.registry.outstanding()
    }

    /// Bytes held for engine-owned outputs not yet concluded.
    pub fn engine_held_bytes(&self) -> usize {
        self.registry.engine_held_bytes()
    }

    // -- Crypto ------------------------------------------------------------

    /// Encrypt `plaintext` to `recipient`. The plaintext is copied before
    /// this returns. A stale recipient or empty plaintext fails the promise.
    pub fn encrypt(
        &self,
        recipient: &ResolvedIdentity,
        plaintext: &[u8],
        password: Option<&str>,
        ownership: Ownership,
    ) -> PromiseId {
        self.engine.encrypt(recipient, plaintext, password, ownership)
    }

    /// Decrypt `blob` with the logged-in account's key.
    ///
    /// [`InputBuffer::CallerOwned`] input is read in place for the whole
    /// operation and never copied; the shared allocation keeps it alive and
    /// unmodified until the promise completes.
    pub fn decrypt(
        &self,
        blob: InputBuffer<'_>,
        password: Option<&str>,
        ownership: Ownership,
    ) -> Result<PromiseId> {
        let identity = lock(&self.auth)
            .active
            .as_ref()
            .map(|(_, identity)| Arc::clone(identity))
            .ok_or(AuthError::NotLoggedIn)?;
        Ok(self.engine.decrypt(identity, blob, password, ownership))
    }

    /// Take (caller-owned) or view (engine-owned) the result of `id`.
    pub fn output(&self, id: PromiseId) -> Result<OutputBuffer> {
        self.engine.output(id)
    }

    pub fn output_exists(&self, id: PromiseId) -> Result<bool> {
        self.engine.output_exists(id)
    }

    /// Whether `identity` can still be encrypted to: the search that found
    /// it is outstanding and still resolves to it.
    pub fn validate_identity(&self, identity: &ResolvedIdentity) -> bool {
        self.engine.is_live(identity)
    }

    /// Whether decrypt `id` finished with authenticated plaintext.
    pub fn decrypt_is_valid(&self, id: PromiseId) -> Result<bool> {
        self.engine.decrypt_is_valid(id)
    }

    /// Header of the envelope produced by encrypt `id`, read in place.
    /// The serialized envelope itself is the encrypt's [`output`](Self::output).
    pub fn envelope_header(&self, id: PromiseId) -> Result<EnvelopeHeader> {
        self.engine.envelope_header(id)
    }

    /// Release a crypto promise and any engine-held output. Exactly once per
    /// encrypt or decrypt promise.
    pub fn conclude(&self, id: PromiseId) -> Result<()> {
        self.engine.conclude(id)
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Disconnect, invalidate every promise and stop the runtime.
    pub fn shutdown(self) -> ShutdownSummary {
        *lock(&self.module_state) = ModuleState::ShuttingDown;
        let was_connected = self.connection_state() == ConnectionState::Connected;
        self.disconnect();
        let outstanding_promises = self.registry.invalidate_all();
        if outstanding_promises > 0 {
            warn!(outstanding_promises, "Shutting down with outstanding promises");
        }
        self.runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
        info!(was_connected, "Helix session shut down");
        ShutdownSummary {
            outstanding_promises,
            was_connected,
        }
    }

    pub fn module_state(&self) -> ModuleState {
        *lock(&self.module_state)
    }

    pub const fn device(&self) -> &Device {
        &self.device
    }

    pub fn server_address(&self) -> &str {
        &self.options.address
    }

    pub const fn server_port(&self) -> u16 {
        self.options.port
    }

    pub const fn flags(&self) -> u64 {
        self.options.flags
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
