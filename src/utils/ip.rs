//! Client address resolution for requests arriving through proxies.
use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;

const UNKNOWN: &str = "unknown";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn strip_mapped(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(v4) => v4.to_string(),
        Err(_) => ip.to_string(),
    }
}

/// Resolve the originating client address.
///
/// Order: first non-`unknown` `X-Forwarded-For` entry, `X-Real-IP`, the
/// socket peer, then the literal `unknown`.
pub fn real_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = header_value(headers, "x-forwarded-for").and_then(|value| {
        value
            .split(',')
            .map(str::trim)
            .find(|entry| !entry.is_empty() && !entry.eq_ignore_ascii_case(UNKNOWN))
    });
    if let Some(ip) = forwarded {
        return strip_mapped(ip);
    }

    if let Some(ip) = header_value(headers, "x-real-ip").filter(|v| !v.eq_ignore_ascii_case(UNKNOWN)) {
        return strip_mapped(ip);
    }

    match peer {
        Some(addr) => strip_mapped(&addr.ip().to_string()),
        None => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn forwarded_for_skips_unknown() {
        let h = headers(&[("x-forwarded-for", "unknown, 203.0.113.5, 10.0.0.1")]);
        assert_eq!(real_client_ip(&h, None), "203.0.113.5");
    }

    #[test]
    fn real_ip_then_peer_then_unknown() {
        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(real_client_ip(&h, None), "198.51.100.2");

        let peer: SocketAddr = "192.0.2.9:4000".parse().unwrap();
        assert_eq!(real_client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.9");
        assert_eq!(real_client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn mapped_ipv6_peer_is_unwrapped() {
        let peer: SocketAddr = "[::ffff:10.1.2.3]:80".parse().unwrap();
        assert_eq!(real_client_ip(&HeaderMap::new(), Some(peer)), "10.1.2.3");
        let peer: SocketAddr = "[::1]:80".parse().unwrap();
        assert_eq!(real_client_ip(&HeaderMap::new(), Some(peer)), "::1");
    }
}
