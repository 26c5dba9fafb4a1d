//! Session/Transport layer
//!
//! One TCP connection carries correlated request/response calls and
//! uncorrelated push events. A single reader task per connection routes
//! `Response` frames to the waiting caller by correlation id and publishes
//! `Event` frames on the [`EventBus`]. Any number of tasks may call
//! [`Session::send_request`] concurrently; each waits only for its own reply.

mod pending;

pub use pending::PendingCalls;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use parley_core::{
    CorrelationId, EventBus, EventKind, Frame, LoginGrant, ParleyError, ProtocolError, Request,
    RequestFactory, Response, Result, SessionConfig, TransportError, WireFormat,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Coarse connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
}

/// Credentials attached to outgoing requests after a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub username: String,
    pub token: String,
    pub user_id: i64,
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub events_published: u64,
    pub timeouts: u64,
    pub stale_responses: u64,
}

#[derive(Default)]
struct StatsCounters {
    requests_sent: AtomicU64,
    responses_matched: AtomicU64,
    events_published: AtomicU64,
    timeouts: AtomicU64,
    stale_responses: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
        }
    }
}

/// Live connection: write half, in-flight calls and the reader task
struct Connection {
    generation: u64,
    address: String,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    pending: Arc<PendingCalls>,
    reader: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Client side of one server connection
///
/// Shared by `Arc`; all methods take `&self`.
pub struct Session {
    config: SessionConfig,
    wire: WireFormat,
    bus: Arc<EventBus>,
    connection: Mutex<Option<Connection>>,
    auth: RwLock<Option<AuthContext>>,
    next_correlation: AtomicU64,
    next_generation: AtomicU64,
    stats: Arc<StatsCounters>,
    closures: watch::Sender<u64>,
}

impl Session {
    pub fn new(config: SessionConfig, bus: Arc<EventBus>) -> Self {
        Self {
            wire: WireFormat::new(config.max_frame_size),
            config,
            bus,
            connection: Mutex::new(None),
            auth: RwLock::new(None),
            next_correlation: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            stats: Arc::new(StatsCounters::default()),
            closures: watch::channel(0).0,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        if self.slot().is_none() {
            SessionState::Disconnected
        } else if self.auth().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Connected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot().is_some()
    }

    /// `host:port` of the live connection
    pub fn peer_address(&self) -> Option<String> {
        self.slot().as_ref().map(|c| c.address.clone())
    }

    pub fn auth(&self) -> Option<AuthContext> {
        self.auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_auth(&self, auth: Option<AuthContext>) {
        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = auth;
    }

    /// Calls currently waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.slot().as_ref().map(|c| c.pending.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Count of connections torn down so far, however they ended
    ///
    /// The receiver wakes on every disconnect, forced disconnect, server
    /// close and failed write.
    pub fn watch_closures(&self) -> watch::Receiver<u64> {
        self.closures.subscribe()
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Open the connection and start its reader task
    pub async fn connect(self: &Arc<Self>, host: &str, port: u16) -> Result<()> {
        let address = format!("{}:{}", host, port);
        if let Some(existing) = self.peer_address() {
            return Err(TransportError::AlreadyConnected { addr: existing }.into());
        }

        let connecting = TcpStream::connect(&address);
        let stream = match timeout(self.config.connect_timeout(), connecting).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ParleyError::connection_failed(&address, e.to_string())),
            Err(_) => {
                return Err(ParleyError::connection_failed(
                    &address,
                    format!("no connection within {}ms", self.config.connect_timeout_ms),
                ))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", address, e);
        }
        let (reader, writer) = stream.into_split();

        let mut slot = self.slot();
        if let Some(existing) = slot.as_ref() {
            return Err(TransportError::AlreadyConnected {
                addr: existing.address.clone(),
            }
            .into());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let pending = Arc::new(PendingCalls::new());
        let reader = tokio::spawn(read_loop(ReaderContext {
            reader,
            wire: self.wire,
            generation,
            pending: Arc::clone(&pending),
            bus: Arc::clone(&self.bus),
            stats: Arc::clone(&self.stats),
            session: Arc::downgrade(self),
        }));

        *slot = Some(Connection {
            generation,
            address: address.clone(),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            pending,
            reader,
        });
        drop(slot);

        info!("Connected to {}", address);
        Ok(())
    }

    /// Close the connection and fail every pending call
    ///
    /// Never waits on the socket: a caller stuck writing to a peer that
    /// stopped reading is released and drops its half of the writer.
    /// Disconnecting an idle session is a no-op.
    pub async fn disconnect(&self) {
        let connection = self.slot().take();
        let Some(connection) = connection else {
            return;
        };

        let failed = self.tear_down(&connection);
        let shutdown = match connection.writer.try_lock() {
            Ok(mut writer) => timeout(self.config.connect_timeout(), writer.shutdown())
                .await
                .unwrap_or(Ok(())),
            // The write in progress is abandoned and closes the half when dropped
            Err(_) => Ok(()),
        };
        if let Err(e) = shutdown {
            debug!("Shutdown of {} failed: {}", connection.address, e);
        }
        info!(
            "Disconnected from {} ({} pending calls failed)",
            connection.address, failed
        );
    }

    /// Teardown of `generation` by its reader task or a failed write
    fn connection_closed(&self, generation: u64, reason: &str) {
        let mut slot = self.slot();
        let current = slot.as_ref().map(|c| c.generation);
        if current != Some(generation) {
            return;
        }
        let connection = slot.take();
        drop(slot);

        if let Some(connection) = connection {
            let failed = self.tear_down(&connection);
            warn!(
                "Connection to {} closed: {} ({} pending calls failed)",
                connection.address, reason, failed
            );
        }
    }

    /// Clear auth, fail pending calls, stop the reader and announce the closure
    fn tear_down(&self, connection: &Connection) -> usize {
        self.set_auth(None);
        let failed = connection.pending.close();
        connection.reader.abort();
        self.closures.send_modify(|count| *count += 1);
        failed
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// Send a request and wait for its correlated response
    ///
    /// The current auth token and user id are attached when the request has
    /// none. A failed [`Response`] is returned as data, not as an error.
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        self.send_request_within(request, self.config.request_timeout())
            .await
    }

    /// [`Session::send_request`] with an explicit deadline
    ///
    /// `limit` covers writing the request and waiting for the response. A
    /// write that fails or runs past the deadline leaves a partial frame on
    /// the stream, so the connection is torn down.
    pub async fn send_request_within(
        &self,
        mut request: Request,
        limit: Duration,
    ) -> Result<Response> {
        let deadline = Instant::now() + limit;
        let (generation, writer, pending) = match self.slot().as_ref() {
            Some(connection) => (
                connection.generation,
                Arc::clone(&connection.writer),
                Arc::clone(&connection.pending),
            ),
            None => return Err(TransportError::NotConnected.into()),
        };

        if request.auth_token.is_none() {
            if let Some(auth) = self.auth() {
                request = request.with_auth(auth.token, Some(auth.user_id));
            }
        }

        let id = CorrelationId::new(self.next_correlation.fetch_add(1, Ordering::SeqCst));
        let kind = request.kind;
        let receiver = pending.register(id)?;

        let frame = Frame::Request { id, request };
        let write = async {
            let mut writer = writer.lock().await;
            self.wire.write_frame(&mut *writer, &frame).await
        };
        let written = tokio::select! {
            written = timeout_at(deadline, write) => match written {
                Ok(result) => result,
                Err(_) => {
                    StatsCounters::bump(&self.stats.timeouts);
                    Err(ParleyError::timeout(limit.as_millis() as u64))
                }
            },
            _ = pending.closed() => Err(ParleyError::connection_lost(format!(
                "connection closed while {} {} was being written",
                kind, id
            ))),
        };
        if let Err(e) = written {
            pending.cancel(id);
            let reason = format!("writing {} {} failed: {}", kind, id, e);
            self.connection_closed(generation, &reason);
            return Err(e);
        }
        StatsCounters::bump(&self.stats.requests_sent);
        debug!("Sent {} {}", kind, id);

        match timeout_at(deadline, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ParleyError::connection_lost(format!(
                "connection closed while {} {} was pending",
                kind, id
            ))),
            Err(_) => {
                pending.cancel(id);
                StatsCounters::bump(&self.stats.timeouts);
                warn!("{} {} timed out after {}ms", kind, id, limit.as_millis());
                Err(ParleyError::timeout(limit.as_millis() as u64))
            }
        }
    }

    /// Log in and remember the granted credentials
    ///
    /// The auth context changes only when the server accepts the login. A
    /// rejected login comes back as a failed [`Response`].
    pub async fn login(&self, username: &str, password: &str) -> Result<Response> {
        let response = self
            .send_request(RequestFactory::login(username, password))
            .await?;
        if response.success {
            let grant = LoginGrant::from_response(&response)?;
            self.set_auth(Some(AuthContext {
                username: username.to_string(),
                token: grant.token,
                user_id: grant.user_id,
            }));
            info!("Logged in as {} (user {})", username, grant.user_id);
        }
        Ok(response)
    }

    /// Log out and forget the credentials if the server agrees
    pub async fn logout(&self) -> Result<Response> {
        let response = self.send_request(RequestFactory::logout()).await?;
        if response.success {
            if let Some(auth) = self.auth() {
                info!("Logged out {}", auth.username);
            }
            self.set_auth(None);
        }
        Ok(response)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let connection = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            connection.pending.close();
            connection.reader.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Reader Task
// ----------------------------------------------------------------------------

struct ReaderContext {
    reader: OwnedReadHalf,
    wire: WireFormat,
    generation: u64,
    pending: Arc<PendingCalls>,
    bus: Arc<EventBus>,
    stats: Arc<StatsCounters>,
    session: Weak<Session>,
}

async fn read_loop(mut ctx: ReaderContext) {
    let reason = loop {
        match ctx.wire.read_frame(&mut ctx.reader).await {
            Ok(Some(Frame::Response { id, response })) => {
                if ctx.pending.complete(id, response) {
                    StatsCounters::bump(&ctx.stats.responses_matched);
                } else {
                    StatsCounters::bump(&ctx.stats.stale_responses);
                    warn!("Dropping response {} with no pending call", id);
                }
            }
            Ok(Some(Frame::Event { event })) => {
                let forced = event.kind == EventKind::ForcedDisconnect;
                StatsCounters::bump(&ctx.stats.events_published);
                ctx.bus.publish(&event);
                if forced {
                    break "server forced a disconnect".to_string();
                }
            }
            Ok(Some(Frame::Request { id, request })) => {
                warn!("Ignoring {} request {} sent by the server", request.kind, id);
            }
            Ok(None) => break "server closed the connection".to_string(),
            // Frame boundaries are intact, only the body was bad
            Err(ParleyError::Protocol(ProtocolError::MalformedFrame { reason })) => {
                error!("Skipping malformed frame: {}", reason);
            }
            Err(e) => break e.to_string(),
        }
    };

    match ctx.session.upgrade() {
        Some(session) => session.connection_closed(ctx.generation, &reason),
        None => {
            ctx.pending.close();
        }
    }
}
