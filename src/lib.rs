//! Inverse Battleships Match Server Library
//!
//! A TCP game server that multiplexes many clients into two-player match
//! sessions of an inverse battleships variant on a 9×9 board.
//!
//! # Architecture
//! A single accept-loop task interleaves lobby scheduling with accepting
//! connections; every connection gets its own session task. All shared
//! state (pending connections, authenticated clients, lobbies, the
//! player→lobby index) lives in the [`registry::Registry`] behind one
//! read-write lock, and socket I/O never happens while the lock is held.
//!
//! # Wire protocol
//! Text frames of the form `IBGAME;VERB;...\n` with `;` escaped as `\;`
//! inside fields. See [`command`] for the verb set and [`codec`] for the
//! framing rules.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use ibgame_server::{net::Listener, registry::Registry, server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = Listener::bind("127.0.0.1:8080").await.unwrap();
//!     let registry = Arc::new(Registry::new());
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     server::run(listener, registry, shutdown_rx).await.unwrap();
//! }
//! ```

pub mod board;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod lobby;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod session;

// Re-export main types for convenience
pub use board::{Board, Outcome, Pos, Side};
pub use client::Client;
pub use command::{ClientCommand, ServerMessage};
pub use config::ServerConfig;
pub use error::{GameError, NetError, ProtocolError};
pub use lobby::{Lobby, LobbyState};
pub use registry::Registry;
