//! # Scoreboard Server Library
//!
//! This library provides the authoritative server for a realtime, per-country
//! click scoreboard. Clients send small score increments; the server credits
//! each increment to the country the client connects from, keeps the running
//! totals in memory, broadcasts them to everyone at a fixed interval and
//! writes them back to durable storage in the background.
//!
//! ## Core Responsibilities
//!
//! ### Score Aggregation
//! The in-memory scoreboard is the source of truth. It is seeded once from the
//! store at startup and refuses every update until that load has completed, so
//! a slow or failed load can never double count points.
//!
//! ### Anti-Cheat
//! A single update carrying more than the per-tick ceiling bans the sending IP
//! for a fixed window. Bans expire lazily the next time the address interacts.
//!
//! ### Broadcasting and Persistence
//! Two timers run alongside the event loop: one fans the full scoreboard out
//! to every session, the other flushes it to the store without blocking
//! further updates.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All inbound packets and timer ticks are handled sequentially by one task
//! that owns the scoreboard and ban table. Storage and socket I/O run on
//! separate tasks and talk to the loop through channels.
//!
//! ### UDP-Based Communication
//! Clients speak `bincode`-encoded [`shared::Packet`] datagrams. Because UDP
//! has no teardown, sessions stay alive through heartbeats and are dropped
//! after a period of silence.
//!
//! ## Module Organization
//!
//! - `ban`: per-address ban state with lazy expiry
//! - `scores`: the country score cache and its loaded/unloaded state
//! - `scoreboard`: admission of updates against bans and the cache
//! - `store`: persistence boundary, file and memory stores, flush cycle
//! - `geo`: IP to country resolution
//! - `session_manager`: live sessions and their resolved countries
//! - `network`: the UDP server, event loop and timers
//! - `config`: runtime parameters
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::geo::CidrTableResolver;
//! use server::network::Server;
//! use server::store::JsonFileStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let geo = CidrTableResolver::from_file("countries.csv")?;
//!     let store = JsonFileStore::new("scores.json");
//!
//!     let mut server = Server::new(
//!         ServerConfig::default(),
//!         Arc::new(store),
//!         Arc::new(geo),
//!     )
//!     .await?;
//!
//!     // Loads the scoreboard, then serves updates, broadcasts and flushes
//!     // for the lifetime of the process
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod ban;
pub mod config;
pub mod geo;
pub mod network;
pub mod scoreboard;
pub mod scores;
pub mod session_manager;
pub mod store;
