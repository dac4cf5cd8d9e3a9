use serde::{Deserialize, Serialize};

/// Unreachable strikes after which a peer is evicted.
pub const UNREACHABLE_LIMIT: u64 = 5;

/// One DHT entry: a peer of this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// URL prefix at which the peer serves its API.
    pub host: String,
    pub node_id: String,
    /// The peer's stripped public key.
    pub public_key: String,
    pub unreachable_count: u64,
    /// ShoggothIDs the peer currently advertises.
    pub pins: Vec<String>,
}

impl Peer {
    pub fn new(host: String, node_id: String, public_key: String) -> Self {
        Self { host, node_id, public_key, unreachable_count: 0, pins: Vec::new() }
    }

    pub fn advertises(&self, shoggoth_id: &str) -> bool {
        self.pins.iter().any(|pin| pin == shoggoth_id)
    }
}

/// The node's view of the network: a peer list keyed by `node_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dht(pub Vec<Peer>);

impl Dht {
    pub fn contains_node(&self, node_id: &str) -> bool {
        self.0.iter().any(|peer| peer.node_id == node_id)
    }

    pub fn find(&self, node_id: &str) -> Option<&Peer> {
        self.0.iter().find(|peer| peer.node_id == node_id)
    }

    /// Peers advertising the given pin.
    pub fn peers_with_pin(&self, shoggoth_id: &str) -> Vec<&Peer> {
        self.0.iter().filter(|peer| peer.advertises(shoggoth_id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(node_id: &str) -> Peer {
        Peer::new(format!("http://{node_id}.example"), node_id.to_string(), "key".to_string())
    }

    #[test]
    fn dht_lookup_is_keyed_by_node_id() {
        let dht = Dht(vec![peer("SHOGNaa"), peer("SHOGNbb")]);

        assert!(dht.contains_node("SHOGNaa"));
        assert!(!dht.contains_node("SHOGNcc"));
        assert_eq!(dht.find("SHOGNbb").unwrap().host, "http://SHOGNbb.example");
    }

    #[test]
    fn peers_with_pin_filters_by_advertisement() {
        let mut first = peer("SHOGNaa");
        first.pins.push("SHOGabc".to_string());
        let second = peer("SHOGNbb");

        let dht = Dht(vec![first, second]);

        let holders = dht.peers_with_pin("SHOGabc");
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].node_id, "SHOGNaa");
        assert!(dht.peers_with_pin("SHOGxyz").is_empty());
    }

    #[test]
    fn new_peer_starts_live_with_no_pins() {
        let peer = peer("SHOGNaa");
        assert_eq!(peer.unreachable_count, 0);
        assert!(peer.pins.is_empty());
    }

    #[test]
    fn dht_serializes_as_a_bare_array() {
        let dht = Dht(vec![peer("SHOGNaa")]);
        let json = serde_json::to_value(&dht).unwrap();
        assert!(json.is_array());

        let parsed: Dht = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, dht);
    }
}
