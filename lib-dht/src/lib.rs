//! Shoggoth DHT Data Model
//!
//! The "DHT" is the node's gossiped peer set: a JSON array of peer entries
//! living in the store, refreshed by the gossip loop. There is no routing
//! and no lookup by ID; every node keeps the full list.
//!
//! A peer is unreachable-struck once per failed gossip round and evicted
//! at [`UNREACHABLE_LIMIT`] strikes. One successful round resets the
//! counter, so the per-peer state machine is:
//! candidate → live → suspect (n failures) → evicted (5 failures).

pub mod manifest;
pub mod peer;
pub mod validation;

pub use manifest::NodeManifest;
pub use peer::{Dht, Peer, UNREACHABLE_LIMIT};
pub use validation::{is_ip_external, valid_peer_host};
