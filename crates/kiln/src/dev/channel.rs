//! Live-reload control channel.
//!
//! A small WebSocket server on its own port. Browsers connect to it and
//! receive [`ReloadEvent`]s as JSON text frames; nothing is ever read back.
//!
//! Broadcasts are queued and fanned out by a single dispatcher task after
//! the configured delay, which keeps them in broadcast order and batches
//! bursts of file events into one visible update.

use crate::dev::ReloadEvent;
use crate::error::DevError;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Router,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Marks every status line sent through [`ControlChannel::log`].
pub const LOG_PREFIX: &str = "💿 ";

/// Per-client queue depth. A client this far behind starts losing events.
const CLIENT_BUFFER: usize = 256;

/// Readiness of a browser connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A connected browser.
#[derive(Debug)]
pub struct ClientConnection {
    tx: mpsc::Sender<String>,
    state: ReadyState,
}

impl ClientConnection {
    pub fn state(&self) -> ReadyState {
        if self.tx.is_closed() {
            ReadyState::Closed
        } else {
            self.state
        }
    }
}

type ClientRegistry = Arc<RwLock<HashMap<usize, ClientConnection>>>;

/// Where `LOG` messages are echoed locally.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

struct Pending {
    due: Instant,
    payload: String,
}

struct ChannelInner {
    clients: ClientRegistry,
    next_client_id: AtomicUsize,
    queue: mpsc::UnboundedSender<Pending>,
    delay: Duration,
    closed: AtomicBool,
    shutdown: CancellationToken,
    log_sink: LogSink,
    local_addr: Mutex<Option<SocketAddr>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the control channel. Cheap to clone.
#[derive(Clone)]
pub struct ControlChannel {
    inner: Arc<ChannelInner>,
}

impl ControlChannel {
    /// Create a channel that is not bound to any port.
    ///
    /// Clients can still be attached with [`ControlChannel::connect`]. Must be
    /// called inside a tokio runtime.
    pub fn new(delay: Duration) -> Self {
        Self::with_log_sink(delay, Arc::new(|message: &str| crate::ui::info(message)))
    }

    /// Create an unbound channel with a custom log sink.
    pub fn with_log_sink(delay: Duration, log_sink: LogSink) -> Self {
        let clients: ClientRegistry = Arc::new(RwLock::new(HashMap::new()));
        let (queue, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(dispatch(Arc::clone(&clients), rx, shutdown.clone()));

        Self {
            inner: Arc::new(ChannelInner {
                clients,
                next_client_id: AtomicUsize::new(0),
                queue,
                delay,
                closed: AtomicBool::new(false),
                shutdown,
                log_sink,
                local_addr: Mutex::new(None),
                server: Mutex::new(None),
            }),
        }
    }

    /// Bind the control port and start accepting browsers.
    ///
    /// Binds all interfaces so devices on the LAN can connect too.
    pub async fn open(port: u16, delay: Duration) -> Result<Self, DevError> {
        let channel = Self::new(delay);
        channel.listen(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        Ok(channel)
    }

    /// Bind `addr` and serve WebSocket upgrades on any path.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, DevError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| DevError::Bind {
                what: "live reload channel",
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| DevError::Bind {
            what: "live reload channel",
            addr: addr.to_string(),
            source,
        })?;

        let router = Router::new().fallback(ws_handler).with_state(self.clone());
        let shutdown = self.inner.shutdown.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::warn!(error = %e, "Live reload channel stopped with an error");
            }
        });

        *self.inner.local_addr.lock() = Some(local_addr);
        *self.inner.server.lock() = Some(server);
        tracing::debug!(%local_addr, "Live reload channel listening");

        Ok(local_addr)
    }

    /// Address the channel is bound to, if it was opened on a port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Send an event to every open client after the broadcast delay.
    ///
    /// `LOG` events are echoed to the log sink right away, even when no
    /// client is connected or the channel is already closed.
    pub fn broadcast(&self, event: &ReloadEvent) {
        if let ReloadEvent::Log { message } = event {
            (self.inner.log_sink)(message);
        }

        if self.is_closed() {
            tracing::trace!(?event, "Dropping broadcast on closed channel");
            return;
        }

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode reload event");
                return;
            }
        };

        let due = Instant::now() + self.inner.delay;
        let _ = self.inner.queue.send(Pending { due, payload });
    }

    /// Broadcast a `LOG` event, prefixed with [`LOG_PREFIX`].
    pub fn log(&self, message: impl AsRef<str>) {
        let message = format!("{}{}", LOG_PREFIX, message.as_ref());
        self.broadcast(&ReloadEvent::log(message));
    }

    /// Attach a client and mark it open.
    ///
    /// After [`close`](Self::close) the returned receiver is already
    /// disconnected and will never yield an event.
    pub fn connect(&self) -> (usize, mpsc::Receiver<String>) {
        let (id, rx) = self.register_client();
        self.mark_open(id);
        (id, rx)
    }

    fn register_client(&self) -> (usize, mpsc::Receiver<String>) {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);

        if self.is_closed() {
            return (id, rx);
        }

        self.inner.clients.write().insert(
            id,
            ClientConnection {
                tx,
                state: ReadyState::Connecting,
            },
        );
        (id, rx)
    }

    fn mark_open(&self, id: usize) {
        if let Some(client) = self.inner.clients.write().get_mut(&id) {
            client.state = ReadyState::Open;
        }
    }

    /// Remove a client from the set.
    pub fn disconnect(&self, id: usize) {
        self.inner.clients.write().remove(&id);
    }

    /// Readiness of a client, `None` once it left the set.
    pub fn client_state(&self, id: usize) -> Option<ReadyState> {
        self.inner.clients.read().get(&id).map(ClientConnection::state)
    }

    /// Number of clients currently in the set.
    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the listener and every client connection.
    ///
    /// Pending delayed broadcasts are discarded. Calling this again is a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut clients = self.inner.clients.write();
            for client in clients.values_mut() {
                client.state = ReadyState::Closing;
            }
            clients.clear();
        }

        self.inner.shutdown.cancel();

        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            let _ = server.await;
        }

        tracing::debug!("Live reload channel closed");
    }
}

/// Fan queued payloads out to every open client, in order.
async fn dispatch(
    clients: ClientRegistry,
    mut rx: mpsc::UnboundedReceiver<Pending>,
    shutdown: CancellationToken,
) {
    loop {
        let pending = tokio::select! {
            _ = shutdown.cancelled() => break,
            pending = rx.recv() => match pending {
                Some(pending) => pending,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(pending.due) => {}
        }

        send_to_open_clients(&clients, &pending.payload);
    }
}

fn send_to_open_clients(clients: &ClientRegistry, payload: &str) {
    let mut gone = Vec::new();

    for (id, client) in clients.read().iter() {
        if client.state() != ReadyState::Open {
            if client.state() == ReadyState::Closed {
                gone.push(*id);
            }
            continue;
        }

        match client.tx.try_send(payload.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client = id, "Live reload client is not keeping up, dropping event");
            }
        }
    }

    if !gone.is_empty() {
        let mut clients = clients.write();
        for id in gone {
            clients.remove(&id);
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(channel): State<ControlChannel>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, channel))
}

async fn handle_socket(mut socket: WebSocket, channel: ControlChannel) {
    let (id, mut rx) = channel.register_client();
    channel.mark_open(id);
    tracing::debug!(client = id, "Live reload client connected");

    let shutdown = channel.inner.shutdown.clone();

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                // Removed from the set, usually by `close`.
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    channel.disconnect(id);
    tracing::debug!(client = id, "Live reload client disconnected");
}
