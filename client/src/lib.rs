//! # Race Client Library
//!
//! A headless client for the racing server. It speaks the full protocol
//! (handshake, ready, control, chat) but renders nothing; the server is the
//! only authority on where the cars are.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! TCP connection and the `init` handshake:
//! - `RaceClient::connect` returns the assigned player id and the initial state
//! - A `Server is full` rejection surfaces as `ClientError::Rejected`
//! - The connection splits into read and write halves for separate tasks
//!
//! ### Game Module (`game`)
//! The client's copy of the race, replaced wholesale by every `state`
//! broadcast, plus the recent chat lines.
//!
//! ### Input Module (`input`)
//! An autopilot that turns the latest snapshot into control messages.

pub mod game;
pub mod input;
pub mod network;
