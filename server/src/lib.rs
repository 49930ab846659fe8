//! # Game Server Library
//!
//! Authoritative core of a real-time multiplayer game server. The server
//! accepts TCP connections, onboards clients through a versioned handshake,
//! keeps the only authoritative copy of every player and monster, schedules
//! time-delayed ability effects and advances the world at a fixed tick rate.
//!
//! ## Architecture
//!
//! ### Network tasks
//! Every connection has a reader task and a writer task. The reader decodes
//! packets and runs the handler registered for the packet's kind
//! ([`handlers::HandlerTable`]). Handlers answer stateless queries such as
//! pings and chunk requests immediately and broadcast inline, but they never
//! touch simulation state.
//!
//! ### Simulation task
//! Exactly one task owns the entity registries, the world and the event
//! manager ([`tick::Simulation`]). Network tasks hand it work through the
//! pending-task queue ([`tasks::TaskQueue`]). Each tick drains every task
//! queued before the drain began, in enqueue order, then advances events,
//! the world and the registries.
//!
//! ### Shared context
//! There is no global state. [`context::ServerContext`] carries the
//! configuration, connection manager, task queue, outbox and record store to
//! every handler.
//!
//! ## Module Organization
//!
//! - `config`: flat key-value configuration with defaults
//! - `connection_manager`: connection lifecycle and player identity leases
//! - `handlers`: message handlers and the handshake
//! - `events`: event chains and the event manager
//! - `registry`: generic entity registry, players and monsters
//! - `world`: projectiles and chunk generation
//! - `tick`: the simulation and its fixed-rate loop
//! - `network`: listener, per-connection tasks and packet routing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::store::MemoryRecordStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::start(config, Arc::new(MemoryRecordStore::new())).await?;
//!     println!("Listening on {}", server.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_manager;
pub mod context;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ids;
pub mod items;
pub mod network;
pub mod outbox;
pub mod registry;
pub mod store;
pub mod tasks;
pub mod tick;
pub mod world;

pub use config::ServerConfig;
pub use error::ServerError;
pub use network::{Server, ServerHandle};
pub use store::{MemoryRecordStore, RecordStore};
