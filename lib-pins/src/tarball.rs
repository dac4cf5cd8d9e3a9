use std::fs::{self, File};
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tar::{Archive, Builder, EntryType, Header};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{PinError, Result};

/// Owner and group recorded in every archive entry.
const ARCHIVE_PRINCIPAL: &str = "shog";

/// Entry mtime fixed to 2019-01-01 00:00:00 UTC so the archive bytes
/// depend only on the logical contents.
const ARCHIVE_MTIME: u64 = 1_546_300_800;

/// Packs a directory into its canonical tarball: entries sorted by name,
/// permissions preserved, owner/group fixed, mtimes fixed, rooted at `.`.
pub fn create_tarball(dir_path: &Path, output_path: &Path) -> Result<()> {
    if !dir_path.is_dir() {
        return Err(PinError::Validation(format!(
            "cannot archive `{}`: not a directory",
            dir_path.display()
        )));
    }

    let output = File::create(output_path)?;
    let mut builder = Builder::new(output);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir_path).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| PinError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        let relative = entry
            .path()
            .strip_prefix(dir_path)
            .map_err(|e| PinError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        let archive_path = Path::new(".").join(relative);

        let metadata = entry
            .path()
            .symlink_metadata()
            .map_err(PinError::Io)?;

        let mut header = Header::new_gnu();
        header.set_mtime(ARCHIVE_MTIME);
        header.set_uid(0);
        header.set_gid(0);
        header.set_username(ARCHIVE_PRINCIPAL)?;
        header.set_groupname(ARCHIVE_PRINCIPAL)?;

        if metadata.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(mode_of(&metadata));
            header.set_size(0);
            builder.append_data(&mut header, &archive_path, io::empty())?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            builder.append_link(&mut header, &archive_path, &target)?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(mode_of(&metadata));
            header.set_size(metadata.len());
            let mut file = File::open(entry.path())?;
            builder.append_data(&mut header, &archive_path, &mut file)?;
        }
    }

    builder.finish()?;

    Ok(())
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(_metadata: &fs::Metadata) -> u32 {
    0o644
}

/// Extracts a tarball into `destination_path`, creating it if necessary.
/// Ownership is ignored and existing entries are overwritten.
pub fn extract_tarball(archive_path: &Path, destination_path: &Path) -> Result<()> {
    fs::create_dir_all(destination_path)?;

    let file = File::open(archive_path)?;
    let mut archive = Archive::new(file);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        entry.unpack_in(destination_path)?;
    }

    Ok(())
}

/// Computes the content hash of a tarball.
///
/// The archive is extracted into a scratch directory under `tmp_path`,
/// every regular file is hashed with SHA-256, the hex digests are sorted
/// lexicographically and concatenated, and the SHA-256 of that text,
/// truncated to 64 hex characters, is the result. The scratch directory is
/// removed before returning.
pub fn hash_tarball(tmp_path: &Path, tarball_path: &Path) -> Result<String> {
    let scratch = tmp_path.join(Uuid::new_v4().to_string());

    let result = hash_extracted(&scratch, tarball_path);

    if scratch.exists() {
        let _ = fs::remove_dir_all(&scratch);
    }

    result
}

fn hash_extracted(scratch: &Path, tarball_path: &Path) -> Result<String> {
    extract_tarball(tarball_path, scratch)?;

    let mut digests = Vec::new();

    for entry in WalkDir::new(scratch).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| PinError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let mut hasher = Sha256::new();
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut hasher)?;
        digests.push(hex::encode(hasher.finalize()));
    }

    digests.sort();

    let combined = lib_crypto::sha256_hex(digests.concat().as_bytes());

    Ok(combined[..64].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn build_fixture(root: &Path) {
        fs::create_dir_all(root.join("code")).unwrap();
        fs::create_dir_all(root.join(".shoggoth")).unwrap();
        fs::write(root.join("code/main.py"), b"print('hello')\n").unwrap();
        fs::write(root.join("readme.md"), b"# fixture\n").unwrap();
        fs::write(root.join(".shoggoth/manifest.json"), b"{}").unwrap();
    }

    #[test]
    fn tarball_round_trip_preserves_contents() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        build_fixture(&source);

        let tarball = dir.path().join("resource.tar");
        create_tarball(&source, &tarball).unwrap();

        let extracted = dir.path().join("extracted");
        extract_tarball(&tarball, &extracted).unwrap();

        assert_eq!(
            fs::read(extracted.join("code/main.py")).unwrap(),
            b"print('hello')\n"
        );
        assert_eq!(fs::read(extracted.join("readme.md")).unwrap(), b"# fixture\n");
        assert!(extracted.join(".shoggoth/manifest.json").is_file());
    }

    #[test]
    fn repeated_pack_hash_cycles_are_stable() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        build_fixture(&source);

        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&tmp).unwrap();

        let first_tarball = dir.path().join("first.tar");
        create_tarball(&source, &first_tarball).unwrap();
        let first = hash_tarball(&tmp, &first_tarball).unwrap();

        let second_tarball = dir.path().join("second.tar");
        create_tarball(&source, &second_tarball).unwrap();
        let second = hash_tarball(&tmp, &second_tarball).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn mutated_contents_change_the_hash() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        build_fixture(&source);

        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&tmp).unwrap();

        let tarball = dir.path().join("before.tar");
        create_tarball(&source, &tarball).unwrap();
        let before = hash_tarball(&tmp, &tarball).unwrap();

        fs::write(source.join("readme.md"), b"# Fixture\n").unwrap();

        let mutated = dir.path().join("after.tar");
        create_tarball(&source, &mutated).unwrap();
        let after = hash_tarball(&tmp, &mutated).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn scratch_directory_is_removed() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        build_fixture(&source);

        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&tmp).unwrap();

        let tarball = dir.path().join("resource.tar");
        create_tarball(&source, &tarball).unwrap();
        hash_tarball(&tmp, &tarball).unwrap();

        assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
    }
}
