use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{PinError, Result};
use crate::fingerprint::Fingerprint;

/// The resource groups a pin may contain.
pub const RESOURCE_GROUPS: [&str; 4] = ["code", "models", "datasets", "papers"];

/// Name of the metadata subdirectory inside every pin.
pub const METADATA_DIR: &str = ".shoggoth";

/// The on-disk pin tree plus the scratch area used for tarball work.
#[derive(Debug, Clone)]
pub struct PinStore {
    pins_root: PathBuf,
    tmp_root: PathBuf,
}

impl PinStore {
    pub fn new(pins_root: PathBuf, tmp_root: PathBuf) -> Self {
        Self { pins_root, tmp_root }
    }

    pub fn pins_root(&self) -> &Path {
        &self.pins_root
    }

    pub fn tmp_root(&self) -> &Path {
        &self.tmp_root
    }

    pub fn pin_dir(&self, shoggoth_id: &str) -> PathBuf {
        self.pins_root.join(shoggoth_id)
    }

    pub fn has_pin(&self, shoggoth_id: &str) -> bool {
        self.pin_dir(shoggoth_id).is_dir()
    }

    /// ShoggothIDs of every pin present on disk.
    pub fn list_pins(&self) -> Result<Vec<String>> {
        let mut pins = Vec::new();

        if !self.pins_root.is_dir() {
            return Ok(pins);
        }

        for entry in fs::read_dir(&self.pins_root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if lib_crypto::is_valid_shoggoth_id(name) {
                    pins.push(name.to_string());
                } else {
                    warn!(entry = %name, "ignoring foreign entry in pins directory");
                }
            }
        }

        pins.sort();
        Ok(pins)
    }

    pub fn fingerprint_path(&self, shoggoth_id: &str) -> PathBuf {
        self.pin_dir(shoggoth_id).join(METADATA_DIR).join("fingerprint.json")
    }

    pub fn signature_path(&self, shoggoth_id: &str) -> PathBuf {
        self.pin_dir(shoggoth_id).join(METADATA_DIR).join("signature.txt")
    }

    pub fn read_fingerprint_text(&self, shoggoth_id: &str) -> Result<String> {
        Ok(fs::read_to_string(self.fingerprint_path(shoggoth_id))?)
    }

    pub fn read_fingerprint(&self, shoggoth_id: &str) -> Result<Fingerprint> {
        Fingerprint::from_json(&self.read_fingerprint_text(shoggoth_id)?)
    }

    pub fn read_signature(&self, shoggoth_id: &str) -> Result<String> {
        Ok(fs::read_to_string(self.signature_path(shoggoth_id))?)
    }

    /// Writes the authentication metadata into a pin directory.
    pub fn write_metadata(dir: &Path, fingerprint_text: &str, signature: &str) -> Result<()> {
        let metadata_dir = dir.join(METADATA_DIR);
        fs::create_dir_all(&metadata_dir)?;

        fs::write(metadata_dir.join("fingerprint.json"), fingerprint_text)?;
        fs::write(metadata_dir.join("signature.txt"), signature)?;

        Ok(())
    }

    /// Total bytes currently held under the pin tree.
    pub fn total_size(&self) -> Result<u64> {
        dir_size(&self.pins_root)
    }

    /// Moves a fully-written sibling directory into place. Readers see the
    /// old directory or the new one, never a half-written state.
    pub fn swap_in(new_dir: &Path, final_dir: &Path) -> Result<()> {
        if final_dir.exists() {
            let mut old_name = final_dir.as_os_str().to_os_string();
            old_name.push(".old");
            let old_dir = PathBuf::from(old_name);

            if old_dir.exists() {
                fs::remove_dir_all(&old_dir)?;
            }

            fs::rename(final_dir, &old_dir)?;
            fs::rename(new_dir, final_dir)?;
            fs::remove_dir_all(&old_dir)?;
        } else {
            if let Some(parent) = final_dir.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(new_dir, final_dir)?;
        }

        Ok(())
    }
}

/// A resource directory must carry its `.shoggoth/` metadata subdirectory.
pub fn validate_resource_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(PinError::Validation("resource directory does not exist".to_string()));
    }

    if !path.join(METADATA_DIR).is_dir() {
        return Err(PinError::Validation(
            "the directory is not a valid Shoggoth resource: no .shoggoth".to_string(),
        ));
    }

    Ok(())
}

/// Recursive size of a directory in bytes; a missing path counts as empty.
pub fn dir_size(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut total = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| PinError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    Ok(total)
}

/// Recursively copies a directory tree.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// The two storage caps from config, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct StorageCaps {
    pub resource_limit: u64,
    pub total_limit: u64,
}

impl StorageCaps {
    /// `max_profile_size` is configured in megabytes, `limit` in gigabytes.
    pub fn from_config(max_profile_size_mb: f64, limit_gb: f64) -> Self {
        Self {
            resource_limit: (max_profile_size_mb * 1_000_000.0) as u64,
            total_limit: (limit_gb * 1_000_000_000.0) as u64,
        }
    }

    /// Rejects an incoming resource that exceeds either cap.
    pub fn check(&self, incoming: u64, current_total: u64) -> Result<()> {
        if incoming > self.resource_limit {
            return Err(PinError::Validation("profile too large".to_string()));
        }

        if incoming.saturating_add(current_total) > self.total_limit {
            return Err(PinError::Validation("storage limit exceeded".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn swap_in_replaces_atomically_visible_contents() {
        let dir = tempdir().unwrap();
        let final_dir = dir.path().join("pins/SHOGtest");

        let first = dir.path().join("first");
        fs::create_dir_all(&first).unwrap();
        fs::write(first.join("v.txt"), b"one").unwrap();
        PinStore::swap_in(&first, &final_dir).unwrap();
        assert_eq!(fs::read(final_dir.join("v.txt")).unwrap(), b"one");

        let second = dir.path().join("second");
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("v.txt"), b"two").unwrap();
        PinStore::swap_in(&second, &final_dir).unwrap();

        assert_eq!(fs::read(final_dir.join("v.txt")).unwrap(), b"two");
        assert!(!dir.path().join("pins/SHOGtest.old").exists());
        assert!(!second.exists());
    }

    #[test]
    fn list_pins_skips_foreign_entries() {
        let dir = tempdir().unwrap();
        let pins_root = dir.path().join("pins");
        let id = format!("SHOG{}", "a".repeat(32));

        fs::create_dir_all(pins_root.join(&id)).unwrap();
        fs::create_dir_all(pins_root.join("not-a-pin")).unwrap();

        let store = PinStore::new(pins_root, dir.path().join("tmp"));
        assert_eq!(store.list_pins().unwrap(), vec![id]);
    }

    #[test]
    fn dir_size_sums_regular_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("sub/b"), vec![0u8; 34]).unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 134);
        assert_eq!(dir_size(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn caps_reject_oversize_uploads() {
        let caps = StorageCaps::from_config(1.0, 1.0);

        assert!(caps.check(500_000, 0).is_ok());

        let too_large = caps.check(2_000_000, 0).unwrap_err();
        assert!(too_large.to_string().contains("profile too large"));

        let store_full = caps.check(900_000, 999_999_999).unwrap_err();
        assert!(store_full.to_string().contains("storage limit exceeded"));
    }

    #[test]
    fn resource_dir_requires_metadata() {
        let dir = tempdir().unwrap();
        let resource = dir.path().join("res");
        fs::create_dir_all(&resource).unwrap();

        assert!(validate_resource_dir(&resource).is_err());

        fs::create_dir_all(resource.join(METADATA_DIR)).unwrap();
        assert!(validate_resource_dir(&resource).is_ok());
    }

    #[test]
    fn metadata_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let pins_root = dir.path().join("pins");
        let id = format!("SHOG{}", "b".repeat(32));
        let pin_dir = pins_root.join(&id);
        fs::create_dir_all(&pin_dir).unwrap();

        let fingerprint_text = r#"{"hash":"h","public_key":"k","shoggoth_id":"s","timestamp":"1"}"#;
        PinStore::write_metadata(&pin_dir, fingerprint_text, "cafe").unwrap();

        let store = PinStore::new(pins_root, dir.path().join("tmp"));
        assert_eq!(store.read_fingerprint_text(&id).unwrap(), fingerprint_text);
        assert_eq!(store.read_signature(&id).unwrap(), "cafe");
        assert_eq!(store.read_fingerprint(&id).unwrap().hash, "h");
    }
}
