//! Shared real-time pixel canvas: a fixed grid of palette colors that many
//! WebSocket clients read and draw on, with per-client cooldowns, batched
//! broadcasts and PNG snapshots.

pub mod broadcast;
pub mod canvas;
pub mod config;
pub mod constants;
pub mod palette;
pub mod payload;
pub mod protocol;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod snapshot;
pub mod socket;
pub mod state;
pub mod tasks;
