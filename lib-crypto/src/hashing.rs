use sha2::{Digest, Sha256};

/// SHA-256 of a byte slice as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_lowercase_hex() {
        let hash = sha256_hex(b"AAAA");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_matches_the_reference_vector() {
        assert_eq!(
            sha256_hex(b"AAAA"),
            "63c1dd951ffedf6f7fd968ad4efa39b8ed584f162f46e715114ee184f8de9201"
        );
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(sha256_hex(b"AAAA"), sha256_hex(b"AAAA"));
        assert_ne!(sha256_hex(b"AAAA"), sha256_hex(b"AAAB"));
    }
}
