//! WebSocket sync client.
//!
//! Provides:
//! - Connection lifecycle (connect, reconnect with automatic re-join)
//! - Optimistic local edits through the [`ClientMirror`]
//! - Throttled cursor/selection updates
//! - Inbound messages applied to the mirror, then surfaced as [`SyncEvent`]s

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::mirror::ClientMirror;
use crate::protocol::{
    generate_room_id, ClientMessage, CursorMovePayload, CursorPosition, CursorSelection,
    ProtocolError, RoomId, ServerMessage, User, Version,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the sync client, after the mirror has been updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Server acknowledged the join
    Joined(RoomId),
    /// Full snapshot received
    StateSynced {
        code: String,
        version: Version,
        users: Vec<User>,
    },
    UserJoined(User),
    UserLeft(User),
    /// Another member's edit replaced the document
    RemoteCode { value: String, version: Version },
    /// Another member moved their cursor
    RemoteCursor(CursorMovePayload),
}

impl SyncEvent {
    fn from_message(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::RoomJoined(p) => SyncEvent::Joined(p.room_id),
            ServerMessage::RoomState(p) => SyncEvent::StateSynced {
                code: p.code,
                version: p.version,
                users: p.users,
            },
            ServerMessage::UserJoined(p) => SyncEvent::UserJoined(p.user),
            ServerMessage::UserLeft(p) => SyncEvent::UserLeft(p.user),
            ServerMessage::CodeUpdate(p) => SyncEvent::RemoteCode {
                value: p.value,
                version: p.version,
            },
            ServerMessage::CursorUpdate(p) => SyncEvent::RemoteCursor(p),
        }
    }
}

/// Events buffered for the application before new ones are dropped.
const EVENT_CAPACITY: usize = 256;

/// How long a closing writer may take to flush and send the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Tasks and outgoing channel of one live socket.
struct Connection {
    outgoing_tx: mpsc::Sender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// The sync client.
pub struct SyncClient {
    /// Local copy of the joined room
    mirror: Arc<Mutex<ClientMirror>>,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// The current socket, if any
    connection: Option<Connection>,

    /// Bumped whenever a socket is replaced; readers of older sockets
    /// must not touch the mirror or the state.
    generation: Arc<AtomicU64>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by connection task)
    event_tx: mpsc::Sender<SyncEvent>,

    /// Server URL
    server_url: String,
}

/// Hand an event to the application without ever blocking the reader.
fn emit(event_tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    if let Err(TrySendError::Full(event)) = event_tx.try_send(event) {
        log::warn!("Event queue full, dropping {event:?}");
    }
}

impl SyncClient {
    pub fn new(user: User, server_url: impl Into<String>) -> Self {
        Self::with_mirror(ClientMirror::new(user), server_url)
    }

    /// Create around a preconfigured mirror (e.g. a custom cursor throttle).
    pub fn with_mirror(mirror: ClientMirror, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            mirror: Arc::new(Mutex::new(mirror)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connection: None,
            generation: Arc::new(AtomicU64::new(0)),
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    ///
    /// Events are dropped when the receiver lags more than 256 events
    /// behind; the mirror is updated regardless.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server, closing any socket that is still open.
    ///
    /// Spawns background tasks for reading/writing WebSocket frames.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.close_connection().await;
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Reconnecting {
                *state = ConnectionState::Connecting;
            }
        }

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Writer task: forward outgoing channel to WebSocket, then close it
        let (outgoing_tx, mut out_rx) = mpsc::channel::<String>(256);
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, SyncEvent::Connected);

        // Reader task: apply inbound messages to the mirror
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let mirror = self.mirror.clone();
        let current = self.generation.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let msg = match ServerMessage::decode(text.as_str()) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("Dropping undecodable frame: {e}");
                                continue;
                            }
                        };
                        let mut mirror = mirror.lock().await;
                        if current.load(Ordering::SeqCst) != generation {
                            return;
                        }
                        if mirror.apply(&msg) {
                            emit(&event_tx, SyncEvent::from_message(msg));
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            let mut mirror = mirror.lock().await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            mirror.disconnect();
            *state.write().await = ConnectionState::Disconnected;
            emit(&event_tx, SyncEvent::Disconnected);
        });

        self.connection = Some(Connection {
            outgoing_tx,
            reader,
            writer,
        });
        Ok(())
    }

    /// Reconnect and, if a room was joined before, request a fresh snapshot.
    pub async fn reconnect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Reconnecting;
        self.connect().await?;

        let room = self.mirror.lock().await.room_id().map(str::to_string);
        if let Some(room_id) = room {
            log::info!("Re-joining room {room_id}");
            self.join_room(room_id).await?;
        }
        Ok(())
    }

    /// Close the socket. The mirror keeps its room id for a later reconnect.
    pub async fn disconnect(&mut self) {
        if self.connection.is_none() {
            return;
        }
        self.close_connection().await;
        *self.state.write().await = ConnectionState::Disconnected;
        emit(&self.event_tx, SyncEvent::Disconnected);
    }

    /// Retire the current socket: its reader stops immediately, its writer
    /// flushes queued frames and sends a close frame.
    async fn close_connection(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        {
            let mut mirror = self.mirror.lock().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            mirror.disconnect();
        }
        connection.reader.abort();

        let Connection {
            outgoing_tx,
            mut writer,
            ..
        } = connection;
        drop(outgoing_tx);
        if timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
            log::warn!("Writer of {} did not close in time", self.server_url);
            writer.abort();
        }
    }

    /// Switch to `room_id`. Remote cursors of the previous room are dropped.
    pub async fn join_room(&self, room_id: impl Into<RoomId>) -> Result<(), ProtocolError> {
        let msg = self.mirror.lock().await.join(room_id);
        self.send(&msg).await
    }

    /// Join a brand new room named `room-<unix millis>`.
    pub async fn create_room(&self) -> Result<RoomId, ProtocolError> {
        let room_id = generate_room_id(SystemTime::now());
        self.join_room(room_id.clone()).await?;
        Ok(room_id)
    }

    /// Replace the document body locally and send it to the server.
    pub async fn edit(&self, value: impl Into<String>) -> Result<(), ProtocolError> {
        let msg = self
            .mirror
            .lock()
            .await
            .local_edit(value)
            .ok_or(ProtocolError::NotJoined)?;
        self.send(&msg).await
    }

    /// Report the local caret/selection. Returns `false` if throttled.
    pub async fn move_cursor(
        &self,
        position: CursorPosition,
        selection: Option<CursorSelection>,
    ) -> Result<bool, ProtocolError> {
        let msg = self
            .mirror
            .lock()
            .await
            .local_cursor(position, selection, Instant::now());
        match msg {
            Some(msg) => self.send(&msg).await.map(|_| true),
            None => Ok(false),
        }
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let text = msg.encode()?;
        match self.connection {
            Some(ref connection) => connection
                .outgoing_tx
                .send(text)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Snapshot of the local mirror.
    pub async fn mirror(&self) -> ClientMirror {
        self.mirror.lock().await.clone()
    }

    pub async fn user(&self) -> User {
        self.mirror.lock().await.me().clone()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::SyncPhase;
    use crate::protocol::{CodeUpdatePayload, RoomJoinedPayload};

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = SyncClient::new(User::new("a", "Alice"), "ws://localhost:3000");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.server_url(), "ws://localhost:3000");
        assert_eq!(client.user().await.name, "Alice");
        assert_eq!(client.mirror().await.phase(), SyncPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let client = SyncClient::new(User::new("a", "Alice"), "ws://localhost:3000");
        assert!(matches!(
            client.join_room("r").await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(matches!(client.edit("x").await, Err(ProtocolError::NotJoined)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = SyncClient::new(User::new("a", "A"), format!("ws://127.0.0.1:{port}"));
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = SyncClient::new(User::new("a", "A"), "ws://localhost:3000");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_emit_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        emit(&tx, SyncEvent::Connected);
        emit(&tx, SyncEvent::Disconnected);
        assert_eq!(rx.recv().await, Some(SyncEvent::Connected));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let mut client = SyncClient::new(User::new("a", "A"), "ws://localhost:3000");
        let mut events = client.take_event_rx().unwrap();
        client.disconnect().await;
        assert!(events.try_recv().is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_event_from_message() {
        let joined = ServerMessage::RoomJoined(RoomJoinedPayload { room_id: "r".into() });
        assert_eq!(SyncEvent::from_message(joined), SyncEvent::Joined("r".into()));

        let update = ServerMessage::CodeUpdate(CodeUpdatePayload {
            room_id: "r".into(),
            value: "v".into(),
            version: 4,
        });
        assert_eq!(
            SyncEvent::from_message(update),
            SyncEvent::RemoteCode {
                value: "v".into(),
                version: 4
            }
        );
    }
}
