//! # orbit-relay: real-time presence and relay for shared rooms
//!
//! Visitors of a shared space (the homepage solar system, the fish tank)
//! see each other as little avatars. This crate keeps track of who is in
//! which room and relays their movements to everyone else.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │  Browser    │ ◄─────────────────► │ RelayServer  │
//! │ (per tab)   │     JSON frames     │ (central)    │
//! └─────────────┘                     └──────┬───────┘
//!                                            │ room id from path
//!                                     ┌──────┴───────┐
//!                                     │ RoomManager  │
//!                                     └──────┬───────┘
//!                                            │
//!                      ┌─────────────────────┼──────────────────┐
//!                      ▼                     ▼                  ▼
//!               ┌─────────────┐     ┌────────────────┐   ┌─────────────┐
//!               │ Room        │────►│ PresenceStore  │   │ Room (tank) │
//!               │ (lifecycle) │     │ memory/RocksDB │   └─────────────┘
//!               └──────┬──────┘     └────────────────┘
//!                      ▼
//!               ┌───────────────┐
//!               │BroadcastGroup │
//!               │ (fan-out)     │
//!               └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`region`]: untrusted country hint → `RegionTag`
//! - [`protocol`]: JSON wire messages and per-room vocabulary
//! - [`store`]: presence stores (in-memory, RocksDB)
//! - [`broadcast`]: per-connection queues with exclusion-aware fan-out
//! - [`room`]: join / relay / leave, and the room manager
//! - [`server`]: WebSocket server

pub mod region;
pub mod protocol;
pub mod store;
pub mod broadcast;
pub mod room;
pub mod server;
pub mod error;

// Re-exports for convenience
pub use region::{resolve_region, RegionTag};
pub use protocol::{
    ClientMessage, ConnectionId, Frame, Position, PresenceRecord, ProtocolError, RoomVocabulary,
    ServerMessage,
};
pub use store::{
    MemoryPresenceStore, PresenceDb, PresenceStore, RocksPresenceStore, StoreConfig, StoreError,
};
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use room::{MessageOutcome, Room, RoomManager, StoreBackend};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use error::RelayError;
