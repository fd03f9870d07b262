//! # Server Components
//!
//! - [`server`]: [`GameServer`], which wires everything below together
//! - [`manager`]: listening socket and per-connection tasks
//! - [`connection`]: handle used to send replies to one client
//! - [`dispatch`]: the serial handler worker
//! - [`handlers`]: one handler per protocol type
//! - [`persistence`]: queue in front of the storage thread
//! - [`storage`]: storage interface and the in-memory backend
//! - [`matchmaker`]: opponent pairing
//! - [`metrics`]: server counters
//! - [`config`]: server configuration

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod handlers;
pub mod manager;
pub mod matchmaker;
pub mod metrics;
pub mod persistence;
pub mod server;
pub mod storage;

pub use config::ServerConfig;
pub use manager::ServerConnectionManager;
pub use matchmaker::Matchmaker;
pub use metrics::ServerStats;
pub use persistence::PersistenceQueue;
pub use server::GameServer;
pub use storage::{MemoryStorage, Storage};
