//! TCP front end of the mock server
//!
//! One reader task and one writer task per accepted connection. Responses and
//! pushes for a connection all go through its writer task, so frames never
//! interleave on the socket.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parley_core::{CorrelationId, Event, Frame, OperationKind, Response, WireFormat};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::directory::{Audience, Directory, LoginChange, Outcome};

/// Payload key that makes the mock delay its reply to a `PING`
pub const DELAY_MS_KEY: &str = "delay_ms";

enum Outbound {
    Frame(Frame),
    Close,
}

struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    user: Option<String>,
}

#[derive(Default)]
struct ServerState {
    directory: Mutex<Directory>,
    connections: Mutex<HashMap<u64, ConnectionHandle>>,
    swallowed: Mutex<HashSet<OperationKind>>,
    next_connection: AtomicU64,
    requests_seen: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServerState {
    fn send_to(&self, audience: &Audience, event: &Event) {
        let connections = lock(&self.connections);
        for handle in connections.values() {
            let wanted = match audience {
                Audience::Everyone => true,
                Audience::User(name) => handle.user.as_deref() == Some(name.as_str()),
                Audience::Users(names) => handle
                    .user
                    .as_ref()
                    .map(|user| names.contains(user))
                    .unwrap_or(false),
                Audience::OthersThan(name) => handle
                    .user
                    .as_ref()
                    .map(|user| user != name)
                    .unwrap_or(false),
            };
            if wanted {
                let _ = handle.outbound.send(Outbound::Frame(Frame::Event {
                    event: event.clone(),
                }));
            }
        }
    }

    fn apply_login(&self, connection: u64, change: &LoginChange) {
        let mut connections = lock(&self.connections);
        if let Some(handle) = connections.get_mut(&connection) {
            match change {
                LoginChange::LoggedIn(user) => handle.user = Some(user.clone()),
                LoginChange::LoggedOut => handle.user = None,
                LoginChange::Unchanged => {}
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Mock Server
// ----------------------------------------------------------------------------

/// In-process chat server speaking the Parley wire format
pub struct MockServer {
    address: SocketAddr,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Bind to an ephemeral loopback port and start accepting
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Mock server accepted {}", peer);
                        spawn_connection(Arc::clone(&accept_state), stream);
                    }
                    Err(e) => {
                        warn!("Mock server accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        info!("Mock server listening on {}", address);
        Ok(Self {
            address,
            state,
            accept_task,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn host(&self) -> String {
        self.address.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Register an account without going through the protocol
    pub fn add_user(&self, username: &str, password: &str) {
        lock(&self.state.directory).add_account(username, password);
    }

    /// Create a group owned by `owner` with the given extra members
    pub fn add_group(&self, name: &str, owner: &str, members: &[&str]) -> i64 {
        let mut directory = lock(&self.state.directory);
        let group_id = directory.create_group(name, owner);
        for member in members {
            directory.join_group(group_id, member);
        }
        group_id
    }

    pub fn is_online(&self, username: &str) -> bool {
        lock(&self.state.directory).is_online(username)
    }

    /// Open connections, logged in or not
    pub fn connection_count(&self) -> usize {
        lock(&self.state.connections).len()
    }

    /// Requests received across all connections
    pub fn requests_seen(&self) -> u64 {
        self.state.requests_seen.load(Ordering::SeqCst)
    }

    /// Stop answering requests of `kind`
    pub fn swallow(&self, kind: OperationKind) {
        lock(&self.state.swallowed).insert(kind);
    }

    /// Push an event to every open connection
    pub fn push_event(&self, event: Event) {
        self.state.send_to(&Audience::Everyone, &event);
    }

    /// Push an event to the connections logged in as `username`
    pub fn push_event_to(&self, username: &str, event: Event) {
        self.state.send_to(&Audience::User(username.to_string()), &event);
    }

    /// Send a raw frame to every open connection
    pub fn push_frame(&self, frame: Frame) {
        for handle in lock(&self.state.connections).values() {
            let _ = handle.outbound.send(Outbound::Frame(frame.clone()));
        }
    }

    /// Close every open connection from the server side
    pub fn close_connections(&self) {
        for handle in lock(&self.state.connections).values() {
            let _ = handle.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.close_connections();
    }
}

// ----------------------------------------------------------------------------
// Connection Tasks
// ----------------------------------------------------------------------------

fn spawn_connection(state: Arc<ServerState>, stream: TcpStream) {
    let connection = state.next_connection.fetch_add(1, Ordering::SeqCst);
    let (reader, writer) = stream.into_split();
    let (outbound, inbound) = mpsc::unbounded_channel();

    lock(&state.connections).insert(
        connection,
        ConnectionHandle {
            outbound: outbound.clone(),
            user: None,
        },
    );

    tokio::spawn(write_loop(writer, inbound));
    tokio::spawn(read_loop(state, connection, reader, outbound));
}

async fn write_loop(mut writer: OwnedWriteHalf, mut inbound: mpsc::UnboundedReceiver<Outbound>) {
    let wire = WireFormat::default();
    while let Some(outbound) = inbound.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = wire.write_frame(&mut writer, &frame).await {
                    debug!("Mock server write failed: {}", e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut writer).await;
}

async fn read_loop(
    state: Arc<ServerState>,
    connection: u64,
    mut reader: OwnedReadHalf,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    let wire = WireFormat::default();
    loop {
        let frame = match wire.read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!("Mock server read failed on connection {}: {}", connection, e);
                break;
            }
        };

        let (id, request) = match frame {
            Frame::Request { id, request } => (id, request),
            other => {
                warn!("Mock server ignoring {} frame from a client", other.label());
                continue;
            }
        };
        state.requests_seen.fetch_add(1, Ordering::SeqCst);

        if lock(&state.swallowed).contains(&request.kind) {
            debug!("Mock server swallowing {} {}", request.kind, id);
            continue;
        }

        let delay = request
            .payload
            .get_i64(DELAY_MS_KEY)
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64));

        let outcome = lock(&state.directory).handle(&request);
        let Outcome {
            response,
            pushes,
            login,
        } = outcome;
        state.apply_login(connection, &login);

        match delay {
            Some(delay) => {
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    reply(&outbound, id, response);
                });
            }
            None => reply(&outbound, id, response),
        }
        for (audience, event) in pushes {
            state.send_to(&audience, &event);
        }
    }

    let user = lock(&state.connections)
        .remove(&connection)
        .and_then(|handle| handle.user);
    if let Some(user) = user {
        lock(&state.directory).drop_login(&user);
    }
    let _ = outbound.send(Outbound::Close);
    debug!("Mock server connection {} closed", connection);
}

fn reply(outbound: &mpsc::UnboundedSender<Outbound>, id: CorrelationId, response: Response) {
    let _ = outbound.send(Outbound::Frame(Frame::Response { id, response }));
}
