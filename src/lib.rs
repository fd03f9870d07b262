//! Communication layer for a networked two-player turn-based board game.
//!
//! - [`common`]: message model, wire codec, framed connections, errors, config and logging
//! - [`server`]: connection manager, dispatch, handlers, persistence queue and matchmaker
//! - [`client`]: connection manager with response correlation and a typed game client

pub mod client;
pub mod common;
pub mod server;

pub use common::error::{NetError, StorageError};
pub use common::messages::{Message, ProtocolType};
