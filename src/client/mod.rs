//! # Client Components
//!
//! ## Connection Manager ([`manager`])
//! One connection to the game server, FIFO-by-kind response correlation,
//! failure propagation to pending callbacks and optional reconnect.
//!
//! ## Game Client ([`client`])
//! Typed request methods (accounts, games, matchmaking, rankings) built on the
//! connection manager.

pub mod client;
pub mod config;
pub mod manager;

// Re-export for convenience
pub use client::{EloEntry, GameClient, GameSnapshot, MatchResult};
pub use config::ClientConfig;
pub use manager::{ClientConnectionManager, ConnectionState, ResponseCallback};
