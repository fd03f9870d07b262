//! # Common Components
//!
//! Shared utilities and data structures used by both client and server components.
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions
//! - [`codec`]: Terminator-based framing
//! - [`connection`]: Framed reader/writer halves over async streams
//! - [`config`]: Configuration loading
//! - [`error`]: Error types
//! - [`logging`]: Logger setup for the binaries

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod messages;
