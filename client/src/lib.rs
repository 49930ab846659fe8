//! # Game Client Library
//!
//! Headless client for the game server. [`network::Client`] speaks the
//! framed packet protocol over TCP, performs the versioned handshake and
//! offers receive helpers with timeouts. [`bot::Bot`] drives a client as a
//! wandering player, which is handy for load and smoke testing.
//!
//! ```rust,no_run
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (mut client, me) =
//!         Client::connect_and_join("127.0.0.1:6143", "0.1.0", "Alice", Duration::from_secs(5))
//!             .await?;
//!     println!("Joined as {}", me.id);
//!     let packet = client.recv().await?;
//!     println!("First packet: {:?}", packet.kind());
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod network;
