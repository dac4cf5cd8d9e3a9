//! Shoggoth Pin Storage
//!
//! A pin is a directory under `node/pins/<ShoggothID>/` holding user
//! content plus a `.shoggoth/` subdirectory with the fingerprint and
//! signature that authenticate it. Resources move between nodes as
//! canonical tarballs whose hash depends only on the logical contents,
//! which is what makes the ShoggothID content-addressed.

pub mod error;
pub mod fingerprint;
pub mod lock;
pub mod storage;
pub mod tarball;

pub use error::PinError;
pub use fingerprint::{validate_authorization, Fingerprint, TimestampSkew, TIMESTAMP_WINDOW_MS};
pub use lock::ScratchLock;
pub use storage::{
    copy_dir, dir_size, validate_resource_dir, PinStore, StorageCaps, METADATA_DIR,
    RESOURCE_GROUPS,
};
pub use tarball::{create_tarball, extract_tarball, hash_tarball};
