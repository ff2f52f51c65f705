//! # Blastr Session Server Library
//!
//! This library provides the authoritative session server for Blastr, a
//! small multiplayer arena shooter. It accepts player connections over TCP,
//! assigns each player a 2-digit identity, stores the attributes players
//! announce about themselves and relays to every other player only what
//! changed since they last heard about it.
//!
//! ## Core Responsibilities
//!
//! ### Identity Management
//! Every connection is registered under the smallest free identity between
//! `00` and `98`. Identities are reused as soon as their holder leaves, and a
//! connection arriving while all of them are taken is told to go away.
//!
//! ### Delta Relay
//! Players announce their colour, name, position and health. The server keeps
//! the latest value of each and, per observer, a queue of attributes the
//! observer has not received yet. A burst of updates between two output
//! passes costs the observer a single frame carrying the newest value.
//!
//! ### Lasers
//! Lasers are owned by the server once fired. They move a fixed step every
//! tick and disappear when they leave the playfield or when a client reports
//! them gone after a hit. Kill reports reset the victim and credit the
//! shooter.
//!
//! ## Architecture Design
//!
//! ### Single-Task Tick Loop
//! One task owns every registry, queue and socket. Each tick it drains admin
//! requests, advances lasers, polls the listener and every player socket for
//! readiness with a bounded wait, reads and dispatches input, accepts at most
//! one newcomer and then writes output to every socket that can take it.
//! Nothing is shared, so nothing is locked.
//!
//! ### Failure Isolation
//! A malformed frame is dropped on its own; a broken socket only removes its
//! player, after the pass that noticed it. Failing to bind the listener is
//! the only fatal error.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Host, port, tick rate, poll wait and player limit.
//!
//! ### Connection Module (`connection`)
//! The transport trait the registries talk to.
//!
//! ### Diff Module (`diff`)
//! Per-observer pending updates and their delivery.
//!
//! ### Lasers Module (`lasers`)
//! Laser movement, bounds and id allocation.
//!
//! ### Network Module (`network`)
//! TCP connections, readiness polling, the tick loop and the admin handle.
//!
//! ### Players Module (`players`)
//! Player registry, attributes and identity allocation.
//!
//! ### Session Module (`session`)
//! Frame dispatch, kills and the output pass.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default());
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.stop();
//!     });
//!
//!     // Binds 127.0.0.1:6000 and ticks 30 times per second until stopped
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod diff;
pub mod error;
pub mod lasers;
pub mod network;
pub mod players;
pub mod session;
