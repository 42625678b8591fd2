//! WebSocket relay server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐  GET /parties/main/<room>   ┌── Room (room id) ── BroadcastGroup
//!             ├─────────────────────────────┤          │
//! Client B ──┘  cf-ipcountry: DE            │          └── dyn PresenceStore
//!                                           │                 (memory | RocksDB)
//!                                           └── RoomManager (lazy create / evict)
//! ```
//!
//! Each accepted socket gets a random connection id, joins the room named
//! by the last path segment, and then pumps frames both ways until the
//! socket closes. Leaving happens exactly once, however the session ends.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::DEFAULT_QUEUE_CAPACITY;
use crate::error::RelayError;
use crate::protocol::{ConnectionId, Frame};
use crate::room::{MessageOutcome, Room, RoomManager, StoreBackend};
use crate::store::{PresenceDb, StoreConfig};

/// Longest accepted room id, in bytes.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound frames buffered per connection
    pub queue_capacity: usize,
    /// Presence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Request header carrying the edge's country hint
    pub region_header: String,
    /// Room used when the request path names none
    pub default_room: String,
    /// Room ids that speak the fish vocabulary
    pub fish_rooms: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1999".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            storage_path: None,
            region_header: "cf-ipcountry".to_string(),
            default_room: "main".to_string(),
            fish_rooms: vec!["tank".to_string()],
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub relayed_messages: u64,
    pub malformed_messages: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    /// Create a server, opening persistent storage if configured.
    pub fn new(config: ServerConfig) -> Result<Self, RelayError> {
        let backend = match &config.storage_path {
            Some(path) => StoreBackend::Rocks(Arc::new(PresenceDb::open(StoreConfig::new(path))?)),
            None => StoreBackend::Memory,
        };
        Ok(Self::with_backend(config, backend))
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::with_backend(ServerConfig::default(), StoreBackend::Memory)
    }

    /// Create with an explicit store backend; `storage_path` is ignored.
    pub fn with_backend(config: ServerConfig, backend: StoreBackend) -> Self {
        let rooms = Arc::new(RoomManager::new(
            backend,
            config.fish_rooms.clone(),
            config.queue_capacity,
        ));
        Self {
            config: Arc::new(config),
            rooms,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Report presence records left behind by a previous process.
    ///
    /// Nothing is loaded eagerly: a room prunes records of connections it
    /// does not hold the first time it reads its store. Returns the number
    /// of rooms with persisted records.
    pub fn recover(&self) -> Result<usize, RelayError> {
        let StoreBackend::Rocks(db) = self.rooms.backend() else {
            return Ok(0);
        };

        let rooms = db.persisted_rooms()?;
        for (room_id, count) in &rooms {
            log::info!("Room {room_id} has {count} persisted presence records");
        }
        Ok(rooms.len())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serve an already bound listener forever.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), RelayError> {
        let recovered = self.recover()?;
        if recovered > 0 {
            log::info!("Found persisted presence for {recovered} rooms");
        }

        log::info!(
            "Relay listening on {} ({} store)",
            listener.local_addr()?,
            self.rooms.backend().name()
        );

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Accept failed: {e}");
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let config = self.config.clone();
            let rooms = self.rooms.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, config, rooms, stats).await {
                    log::warn!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to leave.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        config: Arc<ServerConfig>,
        rooms: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), RelayError> {
        let mut route: Option<(String, Option<String>)> = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let room_id = room_from_path(request.uri().path(), &config.default_room)
                .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "invalid room id"))?;
            let hint = request
                .headers()
                .get(config.region_header.as_str())
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            route = Some((room_id, hint));
            Ok(response)
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
        let Some((room_id, hint)) = route else {
            return Ok(());
        };

        let id = ConnectionId::random();
        log::info!("WebSocket connection {id} established from {addr} for room {room_id}");

        let room = rooms.get_or_create(&room_id).await;
        let mut outbound = room.join(id.clone(), hint.as_deref()).await;
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
            s.active_rooms = rooms.room_count().await;
        }

        let result = Self::pump(ws_stream, &room, &id, &mut outbound, &stats).await;

        room.leave(&id).await;
        drop(room);
        rooms.remove_if_empty(&room_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = rooms.room_count().await;
        }

        result
    }

    /// Move frames between the socket and the room until either side ends.
    async fn pump(
        ws_stream: WebSocketStream<TcpStream>,
        room: &Room,
        id: &ConnectionId,
        outbound: &mut mpsc::Receiver<Frame>,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), RelayError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::dispatch(room, id, text.as_str(), stats).await;
                        }

                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => Self::dispatch(room, id, text, stats).await,
                            Err(_) => {
                                log::warn!("Dropping non UTF-8 binary frame from {id}");
                                stats.write().await.malformed_messages += 1;
                            }
                        },

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {id} closed");
                            break;
                        }

                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing frame addressed to this connection
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    async fn dispatch(room: &Room, id: &ConnectionId, raw: &str, stats: &RwLock<ServerStats>) {
        let outcome = room.on_message(id, raw).await;
        let mut s = stats.write().await;
        s.total_messages += 1;
        match outcome {
            MessageOutcome::Relayed(_) => s.relayed_messages += 1,
            MessageOutcome::Malformed => s.malformed_messages += 1,
            MessageOutcome::Ignored => {}
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get room manager reference.
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}

/// Room id from the upgrade path: its last non-empty segment.
///
/// `/parties/main/tank` → `tank`, `/` → `default_room`. Returns `None`
/// for ids that are too long or contain characters outside
/// `[A-Za-z0-9_.-]`.
pub fn room_from_path(path: &str, default_room: &str) -> Option<String> {
    let room = path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(default_room);
    valid_room_id(room).then(|| room.to_string())
}

fn valid_room_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ROOM_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}
