//! # Sync Link
//!
//! The authenticated TCP link that keeps the Game and AI processes' world
//! views consistent.
//!
//! ## Design
//!
//! The Game process listens and the AI process connects out. A connection
//! starts in `AwaitingAuth` and only a login exchange is accepted until it
//! reaches `Authenticated`. At most one AI process can be linked to a Game
//! process at a time; a second one is answered `AlreadyBound` and dropped.
//!
//! ## Message Flow
//!
//! 1. The AI process's generators spawn monsters, which are buffered and
//!    flushed to the Game process as `SpawnNpc` batches
//! 2. The Game process registers each entry it can resolve and echoes the
//!    rest back as `DestroyNpc` so the AI process can reconcile
//! 3. Player logins, logouts and status flags flow from the Game process to
//!    the AI process, which keeps shadow characters for addressing players
//! 4. Both sides ping each other; a peer silent past the timeout is dropped
//!
//! ## Wire Format
//!
//! Every frame is `[u16 length][u16 type][payload]`, little-endian, with
//! type tags in the 31000 range. See [`protocol`].
//!
//! ## Ordering
//!
//! Every connection is assigned its own partition of the world's
//! [`PartitionedProcessor`](world_core::PartitionedProcessor), so the
//! messages of one connection are applied strictly in receipt order.
//!
//! ## Error Handling
//!
//! Failures are categorized by [`LinkError`]. Only an unauthorized address
//! is fatal; everything else is logged and confined to the message or
//! connection that caused it.

pub mod ai;
pub mod batcher;
pub mod config;
pub mod connection;
pub mod error;
pub mod game;
pub mod peer;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod session;
pub mod utils;

pub use ai::{AiLink, LoggingBrain, NpcBrain};
pub use batcher::SpawnBatcher;
pub use config::LinkConfig;
pub use connection::{ConnectionId, ConnectionManager, RecordingTransport, Transport};
pub use error::LinkError;
pub use game::GameLink;
pub use peer::{Keepalive, PeerLink};
pub use protocol::{LoginResult, MessageType, SyncMessage};
pub use replication::Replicator;
pub use server::{run_uplink, serve_game_link};
pub use session::LinkState;
pub use utils::{create_ai_link, create_game_link};
