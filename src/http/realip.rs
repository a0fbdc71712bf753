//! Client address recovery behind proxies.
//!
//! The excluded ranges are IPv6 loopback (`::1/128`), unique-local
//! (`fc00::/7`) and link-local (`fe80::/10`) only. Private IPv4 ranges are
//! not excluded, so a `10.x` hop in X-Forwarded-For is taken as the client.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

const LOCALHOST: &str = "127.0.0.1";

/// Recovered address plus whether it was confidently identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealIp {
    pub address: String,
    pub proof: bool,
}

/// True for addresses in the excluded IPv6 ranges.
pub fn is_excluded(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => false,
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || first & 0xfe00 == 0xfc00 || first & 0xffc0 == 0xfe80
        }
    }
}

fn eligible(candidate: &str) -> Option<IpAddr> {
    candidate.trim().parse::<IpAddr>().ok().filter(|ip| !is_excluded(ip))
}

/// Pick the client address.
///
/// Each X-Forwarded-For header is scanned right to left and the first
/// eligible entry wins, after passing over `skip` eligible entries that
/// belong to trusted proxies. Without one, the transport peer is used,
/// then `X-Real-Ip` (which never counts as proof), then `127.0.0.1`.
pub fn recover_real_ip(headers: &HeaderMap, remote: Option<SocketAddr>, skip: usize) -> RealIp {
    let mut remaining = skip;
    for value in headers.get_all("x-forwarded-for") {
        let Ok(value) = value.to_str() else { continue };
        for entry in value.rsplit(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some(ip) = eligible(entry) {
                if remaining > 0 {
                    remaining -= 1;
                    continue;
                }
                return RealIp {
                    address: ip.to_string(),
                    proof: true,
                };
            }
        }
    }

    if let Some(remote) = remote {
        if !is_excluded(&remote.ip()) {
            return RealIp {
                address: remote.ip().to_string(),
                proof: true,
            };
        }
    }

    let address = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(eligible)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| LOCALHOST.to_string());

    RealIp {
        address,
        proof: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn test_exclusion_set_is_ipv6_only() {
        for ip in ["::1", "fd12::1", "fc00::9", "fe80::1"] {
            assert!(is_excluded(&ip.parse().unwrap()), "{ip}");
        }
        for ip in ["127.0.0.1", "10.0.0.1", "192.168.1.1", "2001:db8::1"] {
            assert!(!is_excluded(&ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn test_forwarded_for_scanned_right_to_left() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 198.51.100.2, fe80::1")]);
        let ip = recover_real_ip(&h, peer("[::1]:5000"), 0);
        assert_eq!(ip, RealIp { address: "198.51.100.2".into(), proof: true });
    }

    #[test]
    fn test_private_ipv4_is_not_excluded() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.3")]);
        assert_eq!(recover_real_ip(&h, None, 0).address, "10.0.0.3");
    }

    #[test]
    fn test_skip_trusted_hops() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.3")]);
        assert_eq!(recover_real_ip(&h, None, 1).address, "203.0.113.7");
    }

    #[test]
    fn test_falls_back_to_peer() {
        let h = headers(&[("x-forwarded-for", "::1, garbage")]);
        let ip = recover_real_ip(&h, peer("192.0.2.10:4431"), 0);
        assert_eq!(ip, RealIp { address: "192.0.2.10".into(), proof: true });
    }

    #[test]
    fn test_real_ip_header_has_no_proof() {
        let h = headers(&[("x-real-ip", "192.0.2.44")]);
        let ip = recover_real_ip(&h, peer("[fe80::2]:80"), 0);
        assert_eq!(ip, RealIp { address: "192.0.2.44".into(), proof: false });
    }

    #[test]
    fn test_defaults_to_localhost() {
        let ip = recover_real_ip(&HeaderMap::new(), peer("[::1]:80"), 0);
        assert_eq!(ip, RealIp { address: "127.0.0.1".into(), proof: false });
    }
}
