//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                      ┌── Room "room-1" ── Document {code, version}
//!            ├── CollabHub ─────────┤                └── BroadcastGroup (members)
//! Client B ──┘   (RoomRegistry)     └── Room "room-2" ── ...
//! ```
//!
//! One task per connection: it decodes inbound text frames into
//! [`ClientMessage`]s for the hub and drains the connection's outbox back
//! onto the socket. All state is in memory and lost on restart.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{outbox, OutboxReceiver};
use crate::hub::{CollabHub, ConnectionHandle, ServerStats};
use crate::policy::{ConflictPolicy, MembershipPolicy};
use crate::protocol::ClientMessage;
use crate::registry::{MemoryRoomStore, RoomRegistry};
use crate::room::SEED_DOCUMENT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Undelivered messages buffered per connection before drops start
    pub outbox_capacity: usize,
    /// Body of a freshly created room
    pub seed_document: String,
    /// What joining a second room does to the first membership
    pub membership_policy: MembershipPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            outbox_capacity: 256,
            seed_document: SEED_DOCUMENT.to_string(),
            membership_policy: MembershipPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the environment.
    ///
    /// - `LIVECODE_BIND_ADDR`: full bind address
    /// - `PORT`: listen on `0.0.0.0:<PORT>` (ignored if the above is set)
    /// - `LIVECODE_OUTBOX_CAPACITY`: per-connection outbox size
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("LIVECODE_BIND_ADDR") {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::InvalidValue {
                    key: "LIVECODE_BIND_ADDR",
                    value: addr,
                });
            }
            config.bind_addr = addr;
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: port.clone(),
            })?;
            config.bind_addr = format!("0.0.0.0:{port}");
        }

        if let Some(capacity) = lookup("LIVECODE_OUTBOX_CAPACITY") {
            config.outbox_capacity = match capacity.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LIVECODE_OUTBOX_CAPACITY",
                        value: capacity,
                    })
                }
            };
        }

        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "Invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<CollabHub<MemoryRoomStore>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = RoomRegistry::with_store(
            MemoryRoomStore::new(),
            config.seed_document.clone(),
            ConflictPolicy::LastWriteWins,
        );
        let hub = Arc::new(CollabHub::with_registry(registry, config.membership_policy));
        Self { config, hub }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let capacity = self.config.outbox_capacity;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub, capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn hub(&self) -> &Arc<CollabHub<MemoryRoomStore>> {
        &self.hub
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> ServerStats {
        self.hub.stats().await
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Handle a single WebSocket connection until either side closes it.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<CollabHub<MemoryRoomStore>>,
    outbox_capacity: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;

    let (tx, rx) = outbox(outbox_capacity);
    let conn = hub.connect(tx).await;
    log::info!("WebSocket connection {} established from {addr}", conn.id());

    let result = pump(ws_stream, addr, &hub, &conn, rx).await;

    // Membership never outlives the transport connection
    hub.disconnect(&conn).await;
    result
}

/// Move frames between the socket and the hub.
async fn pump(
    ws_stream: WsStream,
    addr: SocketAddr,
    hub: &CollabHub<MemoryRoomStore>,
    conn: &ConnectionHandle,
    mut rx: OutboxReceiver,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ClientMessage::decode(text.as_str()) {
                            Ok(client_msg) => {
                                log::trace!("{} from {}", client_msg.event_name(), conn.id());
                                hub.dispatch(conn, client_msg).await;
                            }
                            Err(e) => {
                                log::warn!("Failed to decode message from {addr}: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                }
            }

            outgoing = rx.recv() => {
                let Some(server_msg) = outgoing else {
                    return Ok(());
                };
                let text = server_msg.encode()?;
                ws_sender.send(Message::Text(text.into())).await?;
            }
        }
    }
}
