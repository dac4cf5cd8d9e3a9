//! Shoggoth Cryptographic Identity Module
//!
//! Every node on the network is identified by an RSA key pair. The public
//! key (in its stripped textual form) hashes into the NodeID, and the
//! canonical tarball of a resource hashes into its ShoggothID. Fingerprints
//! binding resource bytes to their publisher are signed with RSA-SHA256.

pub mod error;
pub mod hashing;
pub mod identity;
pub mod keys;
pub mod signing;

// Re-export commonly used functions
pub use error::CryptoError;
pub use hashing::sha256_hex;
pub use identity::{
    is_valid_node_id, is_valid_shoggoth_id, node_id_from_public_key, shoggoth_id_from_hash,
};
pub use keys::{generate_key_pair, keys_exist, strip_public_key};
pub use signing::{sign_data, verify_signature};
