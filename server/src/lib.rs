//! # Authoritative Server Library
//!
//! Runs the source-of-truth simulation for every connected client's avatar
//! and broadcasts its state so clients can reconcile their predictions.
//!
//! ## Architecture
//!
//! ### Network task
//! Services the UDP transport host. Connects register a client and issue a
//! fresh 64-bit identifier over the reliable channel; input uploads are
//! length-checked, decoded and pushed into the input queue; disconnects and
//! timeouts remove the client. Encoded world snapshots coming back from the
//! authoritative task are broadcast on the unreliable channel.
//!
//! ### Authoritative task
//! The only writer of avatar state. Each tick it applies pending join/leave
//! commands, drains the input queue, applies every sample with the shared
//! movement rule, records the per-client watermark, lets idle avatars coast,
//! and emits one snapshot record per avatar.
//!
//! ## Module Organization
//!
//! - `client_manager`: client registry and atomic identifier issuance
//! - `input_queue`: producer/consumer queue feeding the authoritative tick
//! - `game`: the authoritative simulation
//! - `network`: server configuration, network task and tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use shared::shutdown_channel;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let (trigger, signal) = shutdown_channel();
//!     let handle = tokio::spawn(server.run(signal));
//!
//!     tokio::signal::ctrl_c().await?;
//!     trigger.trigger();
//!     handle.await??;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod game;
pub mod input_queue;
pub mod network;
