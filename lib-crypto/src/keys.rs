use std::fs;
use std::path::Path;

use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::RsaPrivateKey;

use crate::error::{CryptoError, Result};

const RSA_KEY_BITS: usize = 2048;

/// Generates a fresh RSA-2048 key pair and writes both halves as PKCS#1
/// PEM files.
pub fn generate_key_pair(private_key_path: &Path, public_key_path: &Path) -> Result<()> {
    let mut rng = rand::thread_rng();

    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| CryptoError::Key(format!("RSA key generation failed: {e}")))?;
    let public_key = private_key.to_public_key();

    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Key(format!("private key encoding failed: {e}")))?;
    let public_pem = public_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Key(format!("public key encoding failed: {e}")))?;

    fs::write(private_key_path, private_pem.as_bytes())?;
    fs::write(public_key_path, public_pem.as_bytes())?;

    Ok(())
}

/// True when both halves of the node key pair exist in `keys_path`.
pub fn keys_exist(keys_path: &Path) -> bool {
    keys_path.join("private.txt").is_file() && keys_path.join("public.txt").is_file()
}

/// Removes the interior newlines of a PEM public key while keeping the
/// BEGIN/END framing intact.
///
/// The resulting byte sequence is load-bearing: it is the exact input of
/// the NodeID hash, so the index-based rule below must not change.
pub fn strip_public_key(input: &str) -> String {
    let bytes = input.as_bytes();
    let len = bytes.len();

    let mut stripped = String::with_capacity(len);
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' && i > 35 && i + 35 < len {
            continue;
        }
        stripped.push(b as char);
    }

    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn strip_keeps_framing_and_drops_body_newlines() {
        let pem = "-----BEGIN RSA PUBLIC KEY-----\nMIIBCgKCAQEA0p\nWf4z3Oc1J2bQ\n-----END RSA PUBLIC KEY-----\n";
        let stripped = strip_public_key(pem);

        assert!(stripped.starts_with("-----BEGIN RSA PUBLIC KEY-----\n"));
        assert!(stripped.ends_with("\n-----END RSA PUBLIC KEY-----\n"));
        assert!(!stripped.contains("0p\nWf"));
    }

    #[test]
    fn strip_is_idempotent() {
        let pem = "-----BEGIN RSA PUBLIC KEY-----\nAAAA\nBBBB\nCCCC\n-----END RSA PUBLIC KEY-----\n";
        let once = strip_public_key(pem);
        assert_eq!(once, strip_public_key(&once));
    }

    #[test]
    fn generated_keys_exist_on_disk() {
        let dir = tempdir().unwrap();
        let private_path = dir.path().join("private.txt");
        let public_path = dir.path().join("public.txt");

        generate_key_pair(&private_path, &public_path).unwrap();

        assert!(keys_exist(dir.path()));

        let public_pem = std::fs::read_to_string(&public_path).unwrap();
        assert!(public_pem.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
    }
}
