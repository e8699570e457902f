//! Debug server transport.
//!
//! [`Transport`] is the surface the orchestrator drives: broadcast and
//! per-connection sends, publish/subscribe topics for monitor streams, and an
//! inbound-message callback delivered on the transport's own thread.
//! [`WsServer`] is the production implementation over websockets; tests use
//! an in-process channel transport behind the same trait.

use std::collections::{HashMap, HashSet};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info};
use tungstenite::{Message, WebSocket};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind port {0}: {1}")]
    Bind(u16, std::io::Error),
}

/// Inbound message handler: (message text, connection id).
pub type MessageHandler = Arc<dyn Fn(&str, u64) + Send + Sync>;
/// Disconnect handler: connection id.
pub type DisconnectHandler = Arc<dyn Fn(u64) + Send + Sync>;

/// Bidirectional connection to zero or more debug clients.
pub trait Transport: Send + Sync {
    /// Start accepting clients. Returns once the listener is up.
    fn start(&self, port: u16) -> Result<(), ServerError>;
    fn stop(&self);
    /// Broadcast to every connection.
    fn send(&self, message: &str);
    fn send_to(&self, conn_id: u64, message: &str);
    /// Send to every subscriber of a topic.
    fn publish(&self, topic: &str, message: &str);
    fn add_to_topic(&self, topic: &str, conn_id: u64);
    fn remove_from_topic(&self, topic: &str, conn_id: u64);
    fn set_on_message(&self, handler: MessageHandler);
    fn set_on_disconnect(&self, handler: DisconnectHandler);
    fn num_connections(&self) -> usize;
}

// ── Websocket implementation ──────────────────────────────────────────────────

type SharedSocket = Arc<Mutex<WebSocket<TcpStream>>>;

#[derive(Default)]
struct Handlers {
    on_message: Option<MessageHandler>,
    on_disconnect: Option<DisconnectHandler>,
}

/// Websocket debug server: an accept thread plus one reader thread per
/// connection. Writers share the socket through a mutex; readers poll with a
/// read timeout so sends are never starved.
pub struct WsServer {
    connections: Arc<Mutex<HashMap<u64, SharedSocket>>>,
    topics: Arc<Mutex<HashMap<String, HashSet<u64>>>>,
    handlers: Arc<Mutex<Handlers>>,
    running: Arc<AtomicBool>,
    next_conn_id: Arc<AtomicU64>,
    local_port: Arc<AtomicU16>,
}

impl WsServer {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            topics: Arc::new(Mutex::new(HashMap::new())),
            handlers: Arc::new(Mutex::new(Handlers::default())),
            running: Arc::new(AtomicBool::new(false)),
            next_conn_id: Arc::new(AtomicU64::new(0)),
            local_port: Arc::new(AtomicU16::new(0)),
        }
    }

    /// The port actually bound; useful when starting with port 0.
    pub fn local_port(&self) -> u16 {
        self.local_port.load(Ordering::SeqCst)
    }

    fn spawn_reader(&self, conn_id: u64, socket: SharedSocket) {
        let connections = Arc::clone(&self.connections);
        let topics = Arc::clone(&self.topics);
        let handlers = Arc::clone(&self.handlers);
        let running = Arc::clone(&self.running);
        std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let message = {
                    let mut socket = socket.lock().unwrap();
                    match socket.read() {
                        Ok(message) => Some(message),
                        Err(tungstenite::Error::Io(e))
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            None
                        }
                        Err(_) => break,
                    }
                };
                match message {
                    Some(Message::Text(text)) => {
                        let handler = handlers.lock().unwrap().on_message.clone();
                        if let Some(handler) = handler {
                            handler(text.as_str(), conn_id);
                        }
                    }
                    Some(Message::Close(_)) => break,
                    Some(_) => {}
                    // timed out: release the socket so writers get a turn
                    None => std::thread::sleep(Duration::from_millis(5)),
                }
            }
            connections.lock().unwrap().remove(&conn_id);
            for subscribers in topics.lock().unwrap().values_mut() {
                subscribers.remove(&conn_id);
            }
            debug!(conn_id, "client disconnected");
            let handler = handlers.lock().unwrap().on_disconnect.clone();
            if let Some(handler) = handler {
                handler(conn_id);
            }
        });
    }

    fn send_on(socket: &SharedSocket, message: &str) {
        let mut socket = socket.lock().unwrap();
        if let Err(e) = socket.send(Message::text(message)) {
            error!(error = %e, "failed to send message");
        }
    }
}

impl Default for WsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsServer {
    fn start(&self, port: u16) -> Result<(), ServerError> {
        let listener =
            TcpListener::bind(("0.0.0.0", port)).map_err(|e| ServerError::Bind(port, e))?;
        let bound_port = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(port);
        self.local_port.store(bound_port, Ordering::SeqCst);
        listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Bind(port, e))?;
        self.running.store(true, Ordering::SeqCst);
        info!(port = bound_port, "debug server listening");

        let connections = Arc::clone(&self.connections);
        let running = Arc::clone(&self.running);
        let next_conn_id = Arc::clone(&self.next_conn_id);
        let server = WsServer {
            connections: Arc::clone(&self.connections),
            topics: Arc::clone(&self.topics),
            handlers: Arc::clone(&self.handlers),
            running: Arc::clone(&self.running),
            next_conn_id: Arc::clone(&self.next_conn_id),
            local_port: Arc::clone(&self.local_port),
        };
        std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        if stream.set_nonblocking(false).is_err() {
                            continue;
                        }
                        match tungstenite::accept(stream) {
                            Ok(socket) => {
                                // blocking reads with a timeout: the reader
                                // thread yields the socket between frames so
                                // writers are never starved
                                let _ = socket
                                    .get_ref()
                                    .set_read_timeout(Some(Duration::from_millis(50)));
                                let conn_id = next_conn_id.fetch_add(1, Ordering::SeqCst);
                                debug!(conn_id, %addr, "client connected");
                                let socket = Arc::new(Mutex::new(socket));
                                connections
                                    .lock()
                                    .unwrap()
                                    .insert(conn_id, Arc::clone(&socket));
                                server.spawn_reader(conn_id, socket);
                            }
                            Err(e) => error!(error = %e, "websocket handshake failed"),
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.connections.lock().unwrap().clear();
        self.topics.lock().unwrap().clear();
    }

    fn send(&self, message: &str) {
        let sockets: Vec<SharedSocket> =
            self.connections.lock().unwrap().values().cloned().collect();
        for socket in sockets {
            Self::send_on(&socket, message);
        }
    }

    fn send_to(&self, conn_id: u64, message: &str) {
        let socket = self.connections.lock().unwrap().get(&conn_id).cloned();
        if let Some(socket) = socket {
            Self::send_on(&socket, message);
        }
    }

    fn publish(&self, topic: &str, message: &str) {
        let subscribers: Vec<u64> = self
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for conn_id in subscribers {
            self.send_to(conn_id, message);
        }
    }

    fn add_to_topic(&self, topic: &str, conn_id: u64) {
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id);
    }

    fn remove_from_topic(&self, topic: &str, conn_id: u64) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    fn set_on_message(&self, handler: MessageHandler) {
        self.handlers.lock().unwrap().on_message = Some(handler);
    }

    fn set_on_disconnect(&self, handler: DisconnectHandler) {
        self.handlers.lock().unwrap().on_disconnect = Some(handler);
    }

    fn num_connections(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}
