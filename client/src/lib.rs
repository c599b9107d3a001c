//! # Game Client Library
//!
//! Predicts the local avatar immediately from live input and reconciles it
//! against the authoritative snapshots the server broadcasts.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Every tick the prediction loop takes one input snapshot, stamps it with the
//! client identifier and a strictly increasing timestamp, records it in the
//! input history, applies it to the local avatar with the same movement rule
//! the server uses, and queues it for upload.
//!
//! ### Server Reconciliation
//! When a snapshot arrives, the client forces the local avatar to the server's
//! state and replays every recorded sample newer than the server's watermark.
//! If the watermark names a sample that is no longer (or never was) in the
//! history, the avatar snaps to the server state without replay.
//!
//! Prediction and reconciliation take the same world lock, so a replay never
//! interleaves with a prediction tick.
//!
//! ## Module Organization
//!
//! - `game`: the client world, prediction and reconciliation
//! - `input`: live input capture from keyboard/mouse or the wander bot
//! - `simulation`: the fixed-rate prediction loop
//! - `network`: connection handling, input upload and snapshot intake
//! - `rendering`: top-down macroquad view and HUD
//! - `app`: starts and stops the tasks above together
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::app::ClientApp;
//! use client::network::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = ClientApp::start(ClientConfig::default()).await?;
//!     app.spawn_bot();
//!
//!     tokio::signal::ctrl_c().await?;
//!     app.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod game;
pub mod input;
pub mod network;
pub mod rendering;
pub mod simulation;
