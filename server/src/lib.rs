//! # Race Server Library
//!
//! This library provides the authoritative server for the multiplayer racing
//! game. It owns the one shared race state, applies every player's controls
//! to their car, runs the ready/countdown/race/finish lifecycle and pushes the
//! full state to all connected players at a fixed rate.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Clients only send key state and their own collision reports. Car motion,
//! bounces and finish-line handling are computed here, and every client draws
//! whatever the latest broadcast says.
//!
//! ### Session Lifecycle
//! Handles the complete lifecycle of a connection:
//! - `init` handshake, player id assignment and start-grid placement
//! - Capacity enforcement (`Server is full` rejection)
//! - Inactivity timeout and cleanup
//! - Join and leave announcements in chat
//!
//! ### State Broadcasting
//! The whole race state is serialized once per tick and queued to every
//! session. A slow or broken session is dropped without delaying the others.
//!
//! ## Architecture Design
//!
//! ### One Critical Section
//! All mutable state (race, sessions, chat) lives in a single
//! [`game::GameState`] behind one `tokio::sync::Mutex`. Connection workers,
//! the Broadcast Loop and the Countdown timer each take the lock for a short,
//! I/O-free update.
//!
//! ### Per-Session Writers
//! Every session owns a bounded outbox drained by its own writer task. Code
//! holding the lock only enqueues frames, and frames from different senders
//! never interleave on one socket.
//!
//! ### Length-Prefixed JSON over TCP
//! Messages are framed by the shared codec: a 4-byte big-endian length
//! followed by a JSON envelope with `type`, `data` and `timestamp`.
//!
//! ## Module Organization
//!
//! - `client_manager`: session registry, liveness and outbound queues
//! - `game`: the shared state container and its operations
//! - `race`: lobby, countdown, active and finished phases
//! - `physics`: car motion and collision responses
//! - `chat`: bounded chat history
//! - `network`: TCP front end, Broadcast Loop and Countdown timer
//! - `error`: server error types
//! - `utils`: time helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client_manager;
pub mod error;
pub mod game;
pub mod network;
pub mod physics;
pub mod race;
pub mod utils;
