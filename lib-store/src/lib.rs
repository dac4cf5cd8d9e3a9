//! ShogDB Store Client
//!
//! The node keeps its `dht` and `pins` documents in an embedded JSON
//! document store reachable over a loopback HTTP socket. Every operation
//! is a single request; the store guarantees single-operation atomicity
//! and nothing more.
//!
//! Wire format: response bodies are `<TYPE> <value>` where TYPE is one of
//! STR, ERR, BOOL, UINT, INT, FLOAT, JSON or NULL. Write operations answer
//! with a bare `OK`.

pub mod client;
pub mod error;
pub mod value;

pub use client::StoreClient;
pub use error::StoreError;
pub use value::DbValue;
