//! WebSocket transport adapter
//!
//! [`WebSocketServer`] plugs a tokio-tungstenite listener into a
//! [`ServerCore`]:
//! - ->STARTING binds the listener and reports the outcome
//! - ->STOPPING closes the listener, closes every registered connection and
//!   reports completion
//! - accepted connections are registered and announced on
//!   `connection_established`, inbound message frames go to
//!   `message_received`, disconnects go to `connection_dropped`
//!
//! # Example
//!
//! ```no_run
//! use tether_transport::{WebSocketServer, WebSocketServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = WebSocketServer::new(WebSocketServerConfig::from_env())?;
//!     let core = server.core();
//!
//!     core.message_received().subscribe(|envelope| {
//!         println!("{} says {}", envelope.connection_id, envelope.payload);
//!     });
//!
//!     core.start_and_wait().await?;
//!     tokio::signal::ctrl_c().await?;
//!     core.stop_and_wait().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tether_core::{ConnectionId, LifecycleState, MessageEnvelope, Payload, ServerCore};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WebSocketServerConfig;
use crate::error::{Result, TransportError};
use crate::frame::EventFrame;
use crate::registry::ConnectionRegistry;
use crate::traits::ConnectionHandle;

/// One accepted WebSocket connection
pub struct WebSocketConnection {
    id: ConnectionId,
    addr: SocketAddr,
    event_name: String,
    tx: mpsc::Sender<WsMessage>,
    connected: AtomicBool,
    closed: Notify,
}

impl WebSocketConnection {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl ConnectionHandle for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, payload: &Payload) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        let text = EventFrame::new(self.event_name.as_str(), payload.clone()).encode()?;
        self.tx
            .try_send(WsMessage::Text(text))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // stores a permit if the reader is not waiting yet
        self.closed.notify_one();
        self.tx
            .try_send(WsMessage::Close(None))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct ListenerTask {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// State shared between the lifecycle handlers and the I/O tasks
struct Shared {
    config: WebSocketServerConfig,
    registry: Arc<ConnectionRegistry<WebSocketConnection>>,
    runtime: Handle,
    provided: Option<std::net::TcpListener>,
    listener: Mutex<Option<ListenerTask>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl Shared {
    async fn bind(&self) -> Result<TcpListener> {
        match &self.provided {
            Some(listener) => {
                let listener = listener.try_clone()?;
                listener.set_nonblocking(true)?;
                Ok(TcpListener::from_std(listener)?)
            }
            None => {
                let addr = self.config.addr();
                TcpListener::bind(&addr)
                    .await
                    .map_err(|source| TransportError::Bind { addr, source })
            }
        }
    }
}

/// WebSocket server adapter
pub struct WebSocketServer {
    core: Arc<ServerCore>,
    shared: Arc<Shared>,
}

impl WebSocketServer {
    /// Create a server that binds `config.addr()` on every start.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: WebSocketServerConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a server on a listener bound by the caller.
    ///
    /// The listener is kept for the whole lifetime of the server, so it can be
    /// started and stopped repeatedly on the same address.
    pub fn with_listener(
        config: WebSocketServerConfig,
        listener: std::net::TcpListener,
    ) -> Result<Self> {
        Self::build(config, Some(listener))
    }

    fn build(config: WebSocketServerConfig, provided: Option<std::net::TcpListener>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let core = Arc::new(ServerCore::new("websocket"));
        let shared = Arc::new(Shared {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            runtime,
            provided,
            listener: Mutex::new(None),
            local_addr: RwLock::new(None),
        });

        core.install_sink(shared.registry.clone());

        let weak = Arc::downgrade(&core);
        let s = Arc::clone(&shared);
        core.state_changed().on(LifecycleState::Starting, move |_| {
            if let Some(core) = weak.upgrade() {
                s.runtime.spawn(start_listening(core, Arc::clone(&s)));
            }
        });

        let weak = Arc::downgrade(&core);
        let s = Arc::clone(&shared);
        core.state_changed().on(LifecycleState::Stopping, move |_| {
            if let Some(core) = weak.upgrade() {
                s.runtime.spawn(stop_listening(core, Arc::clone(&s)));
            }
        });

        let s = Arc::clone(&shared);
        core.state_changed().on(LifecycleState::Listening, move |_| {
            info!("WebSocket server started on {:?}", *s.local_addr.read());
        });
        core.state_changed()
            .on(LifecycleState::Stopped, |_| info!("WebSocket server stopped"));

        Ok(Self { core, shared })
    }

    /// The lifecycle core driven by this adapter
    pub fn core(&self) -> &Arc<ServerCore> {
        &self.core
    }

    pub fn config(&self) -> &WebSocketServerConfig {
        &self.shared.config
    }

    /// Bound address while LISTENING
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.read()
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        if let Some(listener) = self.shared.listener.lock().take() {
            let _ = listener.shutdown.send(true);
            listener.task.abort();
        }
        for connection in self.shared.registry.close_all() {
            let _ = connection.close();
        }
    }
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("core", &self.core)
            .field("local_addr", &self.local_addr())
            .field("registry", &self.shared.registry)
            .finish()
    }
}

// =============================================================================
// Lifecycle handlers
// =============================================================================

async fn start_listening(core: Arc<ServerCore>, shared: Arc<Shared>) {
    let bound = tokio::time::timeout(shared.config.start_timeout(), shared.bind())
        .await
        .unwrap_or(Err(TransportError::Timeout));

    let outcome = bound.map(|listener| {
        *shared.local_addr.write() = listener.local_addr().ok();
        shared.registry.open();

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            rx,
            Arc::clone(&core),
            Arc::clone(&shared),
        ));
        *shared.listener.lock() = Some(ListenerTask { shutdown, task });
    });

    if let Err(e) = core.report_start_result(outcome) {
        warn!("start outcome not applied: {}", e);
    }
}

async fn stop_listening(core: Arc<ServerCore>, shared: Arc<Shared>) {
    let listener = shared.listener.lock().take();
    if let Some(listener) = listener {
        let _ = listener.shutdown.send(true);
        if let Err(e) = listener.task.await {
            error!("listener task failed: {}", e);
        }
    }
    *shared.local_addr.write() = None;

    for connection in shared.registry.close_all() {
        debug!("cleaning up connection: {}", connection.id());
        if let Err(e) = connection.close() {
            warn!("closing {} failed: {}", connection.id(), e);
        }
        core.connection_dropped().push(connection.id().clone());
    }

    if let Err(e) = core.report_stopped() {
        warn!("stop outcome not applied: {}", e);
    }
}

// =============================================================================
// I/O tasks
// =============================================================================

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    core: Arc<ServerCore>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Accepted TCP connection from {}", addr);
                    tokio::spawn(serve_connection(
                        stream,
                        addr,
                        Arc::clone(&core),
                        Arc::clone(&shared),
                    ));
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
    debug!("listener closed");
}

async fn accept_websocket(stream: TcpStream) -> Result<WebSocketStream<TcpStream>> {
    Ok(tokio_tungstenite::accept_async(stream).await?)
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    core: Arc<ServerCore>,
    shared: Arc<Shared>,
) {
    let ws_stream = match accept_websocket(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket connection from {} rejected: {}", addr, e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<WsMessage>(shared.config.send_buffer.max(1));
    let connection = Arc::new(WebSocketConnection {
        id: ConnectionId::new(Uuid::new_v4().to_string()),
        addr,
        event_name: shared.config.event_name.clone(),
        tx,
        connected: AtomicBool::new(true),
        closed: Notify::new(),
    });
    let id = connection.id().clone();

    let registered = shared.registry.insert_with(Arc::clone(&connection), |id| {
        info!("connection opened: {} ({})", id, addr);
        core.connection_established().push(id.clone());
    });
    if !registered {
        debug!("not accepting connections, closing {}", addr);
        let _ = write.send(WsMessage::Close(None)).await;
        return;
    }

    // Spawn writer task
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                debug!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    loop {
        tokio::select! {
            _ = connection.closed.notified() => break,
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    on_frame(&core, &shared, &id, text.as_bytes());
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    on_frame(&core, &shared, &id, &data);
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    debug!("close frame from {}: {:?}", id, reason);
                    break;
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket read error on {}: {}", id, e);
                    break;
                }
                None => break,
            }
        }
    }

    connection.connected.store(false, Ordering::SeqCst);
    // teardown may already have removed and announced this connection
    if shared.registry.remove(&id).is_some() {
        info!("connection closed: {}", id);
        let _ = connection.tx.try_send(WsMessage::Close(None));
        core.connection_dropped().push(id);
    }
}

fn on_frame(core: &ServerCore, shared: &Shared, id: &ConnectionId, raw: &[u8]) {
    if raw.len() > shared.config.max_message_size {
        warn!(
            "dropping {} byte frame from {} (max {})",
            raw.len(),
            id,
            shared.config.max_message_size
        );
        return;
    }

    match EventFrame::decode(raw) {
        Ok(frame) if frame.event == shared.config.event_name => {
            if shared.registry.contains(id) {
                core.message_received()
                    .push(MessageEnvelope::new(id.clone(), frame.data));
            }
        }
        Ok(frame) => debug!("ignoring event {:?} from {}", frame.event, id),
        Err(e) => debug!("undecodable frame from {}: {}", id, e),
    }
}
