use crate::hashing::sha256_hex;

/// Prefix of a node identifier.
pub const NODE_ID_PREFIX: &str = "SHOGN";
/// Prefix of a resource identifier.
pub const SHOGGOTH_ID_PREFIX: &str = "SHOG";

/// Derives the NodeID from a stripped public key.
///
/// The ID is the literal `SHOGN` prefix followed by the tail (from index
/// 32) of the SHA-256 hex digest of the stripped key bytes, 37 characters
/// in total.
pub fn node_id_from_public_key(stripped_public_key: &str) -> String {
    let hash = sha256_hex(stripped_public_key.as_bytes());
    format!("{}{}", NODE_ID_PREFIX, &hash[32..])
}

/// Derives the ShoggothID of a resource from its canonical tarball hash.
///
/// Same construction as the NodeID but with the `SHOG` prefix, 36
/// characters in total.
pub fn shoggoth_id_from_hash(hash: &str) -> String {
    format!("{}{}", SHOGGOTH_ID_PREFIX, &hash[32..])
}

/// Syntactic check of a NodeID: `SHOGN` + 32 hex characters.
pub fn is_valid_node_id(id: &str) -> bool {
    id.len() == 37
        && id.starts_with(NODE_ID_PREFIX)
        && id[NODE_ID_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Syntactic check of a ShoggothID: `SHOG` + 32 hex characters.
pub fn is_valid_shoggoth_id(id: &str) -> bool {
    id.len() == 36
        && id.starts_with(SHOGGOTH_ID_PREFIX)
        && !id.starts_with(NODE_ID_PREFIX)
        && id[SHOGGOTH_ID_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_matches_reference_vector() {
        // sha256("AAAA") = 63c1dd951ffedf6f7fd968ad4efa39b8ed584f162f46e715114ee184f8de9201
        let node_id = node_id_from_public_key("AAAA");
        assert_eq!(node_id, "SHOGNed584f162f46e715114ee184f8de9201");
        assert_eq!(node_id.len(), 37);
    }

    #[test]
    fn node_id_is_deterministic() {
        assert_eq!(node_id_from_public_key("key"), node_id_from_public_key("key"));
        assert_ne!(node_id_from_public_key("key"), node_id_from_public_key("other"));
    }

    #[test]
    fn shoggoth_id_from_full_hash() {
        let hash = sha256_hex(b"resource bytes");
        let id = shoggoth_id_from_hash(&hash);
        assert_eq!(id.len(), 36);
        assert!(id.starts_with("SHOG"));
        assert!(is_valid_shoggoth_id(&id));
    }

    #[test]
    fn id_validation_rejects_malformed_input() {
        assert!(is_valid_node_id("SHOGNed584f162f46e715114ee184f8de9201"));
        assert!(!is_valid_node_id("SHOGN"));
        assert!(!is_valid_node_id("SHOGNzz84f162f46e715114ee184f8de9201x"));

        assert!(!is_valid_shoggoth_id("SHOG"));
        assert!(!is_valid_shoggoth_id("SHOGNed584f162f46e715114ee184f8de92"));
        assert!(!is_valid_shoggoth_id("../../../../../../etc/passwd"));
    }
}
