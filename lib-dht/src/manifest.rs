use serde::{Deserialize, Serialize};

/// The announce document a node serves at `/api/get_manifest` and sends as
/// the body of its gossip requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeManifest {
    pub public_host: String,
    pub public_key: String,
    pub node_id: String,
    pub has_explorer: bool,
    pub version: String,
}

impl NodeManifest {
    /// Builds a manifest from a stripped public key, deriving the NodeID.
    pub fn new(stripped_public_key: String, public_host: String, has_explorer: bool, version: String) -> Self {
        let node_id = lib_crypto::node_id_from_public_key(&stripped_public_key);

        Self { public_host, public_key: stripped_public_key, node_id, has_explorer, version }
    }

    /// True when the claimed node_id is actually derived from the claimed
    /// public key. A hostile peer can claim any ID; this closes that hole.
    pub fn node_id_is_consistent(&self) -> bool {
        lib_crypto::node_id_from_public_key(&self.public_key) == self.node_id
    }
}
