//! Shoggoth Network Node
//!
//! A node stores a set of pinned content-addressed resources, gossips a
//! peer list with the rest of the network, replicates pins its peers
//! advertise, and serves everything over one HTTP endpoint. The node
//! supervises an embedded key/value store child process that holds the
//! `dht` and `pins` documents.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod dht;
pub mod error;
pub mod replication;
pub mod server;
pub mod supervisor;

pub use config::NodeConfig;
pub use context::NodeCtx;
pub use error::{NodeError, Result};
