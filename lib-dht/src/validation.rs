/// Private and loopback IPv4 prefixes.
const PRIVATE_RANGES: [&str; 4] = ["10.", "172.16.", "192.168.", "127."];

/// True when the host part does not fall in a private or loopback range.
pub fn is_ip_external(host: &str) -> bool {
    !PRIVATE_RANGES.iter().any(|range| host.starts_with(range))
}

/// Syntactic and policy check of a peer host URL: `http://` or `https://`
/// prefix, at least 10 characters, and (unless private networks are
/// allowed) an external address.
pub fn valid_peer_host(peer_host: &str, allow_private_network: bool) -> bool {
    if peer_host.len() < 10 {
        return false;
    }

    let host = if let Some(rest) = peer_host.strip_prefix("http://") {
        rest
    } else if let Some(rest) = peer_host.strip_prefix("https://") {
        rest
    } else {
        return false;
    };

    if !allow_private_network && !is_ip_external(host) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_external_hosts() {
        assert!(valid_peer_host("http://shog.ai", false));
        assert!(valid_peer_host("https://node1.example.com:8080", false));
        assert!(valid_peer_host("http://8.8.8.8:6969", false));
    }

    #[test]
    fn rejects_malformed_hosts() {
        assert!(!valid_peer_host("shog.ai", false));
        assert!(!valid_peer_host("ftp://shog.ai", false));
        assert!(!valid_peer_host("http://a", false));
        assert!(!valid_peer_host("", false));
    }

    #[test]
    fn private_ranges_depend_on_policy() {
        for host in ["http://127.0.0.1:6969", "http://10.0.0.5:80", "http://192.168.1.4:80"] {
            assert!(!valid_peer_host(host, false), "{host} should be rejected");
            assert!(valid_peer_host(host, true), "{host} should be allowed");
        }
    }

    #[test]
    fn external_check_only_matches_prefixes() {
        assert!(is_ip_external("172.160.0.1"));
        assert!(!is_ip_external("172.16.0.1"));
        assert!(is_ip_external("1270.0.0.1"));
        assert!(!is_ip_external("127.0.0.1"));
    }
}
