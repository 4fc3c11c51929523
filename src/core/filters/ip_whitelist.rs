//! Client IP whitelist with CIDR, wildcard and loopback aliasing.
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use async_trait::async_trait;

use crate::core::{
    error::DenyReason,
    filter::{FilterContext, GatewayFilter, IP_WHITELIST_PRIORITY, Next},
    request::{GatewayRequest, GatewayResponse},
};

/// CIDR network, matched byte-wise with a partial mask on the last byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpNetwork {
    octets: Vec<u8>,
    prefix_len: u8,
}

impl IpNetwork {
    /// Parse from CIDR notation (e.g., "192.168.1.0/24")
    pub fn parse(s: &str) -> Result<Self, String> {
        let (ip_str, prefix_str) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' is not in CIDR notation"))?;
        let addr = IpAddr::from_str(ip_str.trim())
            .map_err(|e| format!("Invalid IP address in '{s}': {e}"))?;
        let prefix_len: u8 = prefix_str
            .trim()
            .parse()
            .map_err(|e| format!("Invalid prefix length in '{s}': {e}"))?;

        let octets = octets(addr);
        if usize::from(prefix_len) > octets.len() * 8 {
            return Err(format!(
                "Prefix length {prefix_len} exceeds {} bits in '{s}'",
                octets.len() * 8
            ));
        }
        Ok(Self { octets, prefix_len })
    }

    /// Check if an IP address is contained in this network
    pub fn contains(&self, ip: IpAddr) -> bool {
        let candidate = octets(ip);
        if candidate.len() != self.octets.len() {
            return false;
        }

        let full = usize::from(self.prefix_len / 8);
        if candidate[..full] != self.octets[..full] {
            return false;
        }

        let bits = self.prefix_len % 8;
        if bits == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - bits);
        (candidate[full] & mask) == (self.octets[full] & mask)
    }
}

fn octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.octets().to_vec(),
            None => v6.octets().to_vec(),
        },
    }
}

/// One compiled whitelist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRule {
    Exact(IpAddr),
    /// `127.0.0.1`, `::1` and `localhost` are interchangeable.
    Loopback,
    Cidr(IpNetwork),
    /// Dotted IPv4 with `*` octets; `None` is a wildcard.
    Wildcard([Option<u8>; 4]),
}

impl IpRule {
    pub fn parse(entry: &str) -> Result<Self, String> {
        let entry = entry.trim();
        if entry.eq_ignore_ascii_case("localhost") {
            return Ok(IpRule::Loopback);
        }
        if entry.contains('/') {
            return IpNetwork::parse(entry).map(IpRule::Cidr);
        }
        if entry.contains('*') {
            let parts: Vec<&str> = entry.split('.').collect();
            if parts.len() != 4 {
                return Err(format!("Wildcard entry '{entry}' must have four octets"));
            }
            let mut octets = [None; 4];
            for (slot, part) in octets.iter_mut().zip(parts) {
                if part != "*" {
                    *slot = Some(
                        part.parse::<u8>()
                            .map_err(|_| format!("Invalid octet '{part}' in '{entry}'"))?,
                    );
                }
            }
            return Ok(IpRule::Wildcard(octets));
        }

        let addr = normalize(entry)
            .parse::<IpAddr>()
            .map_err(|_| format!("'{entry}' is not an IP address, CIDR block or wildcard"))?;
        if is_loopback_alias(addr) {
            Ok(IpRule::Loopback)
        } else {
            Ok(IpRule::Exact(addr))
        }
    }

    /// Match a client address as reported by the transport or proxy headers.
    pub fn matches(&self, client_ip: &str) -> bool {
        let client = normalize(client_ip);
        let parsed = client.parse::<IpAddr>().ok();
        match self {
            IpRule::Loopback => {
                client.eq_ignore_ascii_case("localhost") || parsed.is_some_and(is_loopback_alias)
            }
            IpRule::Exact(addr) => parsed.is_some_and(|ip| canonical(ip) == canonical(*addr)),
            IpRule::Cidr(network) => parsed.is_some_and(|ip| network.contains(ip)),
            IpRule::Wildcard(pattern) => {
                let parts: Vec<&str> = client.split('.').collect();
                parts.len() == 4
                    && pattern.iter().zip(parts).all(|(want, got)| match want {
                        None => true,
                        Some(octet) => got.parse::<u8>().ok() == Some(*octet),
                    })
            }
        }
    }
}

/// Strip an IPv4-mapped IPv6 prefix (`::ffff:10.0.0.1` -> `10.0.0.1`).
fn normalize(ip: &str) -> &str {
    let ip = ip.trim();
    match ip.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("::ffff:") && ip[7..].contains('.') => &ip[7..],
        _ => ip,
    }
}

fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

/// Only `127.0.0.1` and `::1`; the rest of `127.0.0.0/8` is matched exactly.
fn is_loopback_alias(ip: IpAddr) -> bool {
    match canonical(ip) {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST,
    }
}

pub struct IpWhitelistFilter;

impl IpWhitelistFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IpWhitelistFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayFilter for IpWhitelistFilter {
    fn name(&self) -> &'static str {
        "ip_whitelist"
    }

    fn priority(&self) -> i32 {
        IP_WHITELIST_PRIORITY
    }

    fn is_enabled(&self, ctx: &FilterContext) -> bool {
        ctx.snapshot().policies.whitelist.enabled
    }

    async fn filter(&self, req: GatewayRequest, next: Next<'_>) -> Option<GatewayResponse> {
        if next.context().snapshot().policies.whitelist.admits(&req.client_ip) {
            return next.run(req).await;
        }

        tracing::warn!(
            client_ip = %req.client_ip,
            trace_id = %req.trace_id,
            "Request rejected by IP whitelist"
        );
        Some(GatewayResponse::denied(DenyReason::Ip {
            ip: req.client_ip.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(s: &str) -> IpRule {
        IpRule::parse(s).expect("valid rule")
    }

    #[test]
    fn cidr_ipv4() {
        let r = rule("10.0.0.0/8");
        assert!(r.matches("10.1.2.3"));
        assert!(!r.matches("11.1.2.3"));

        let r = rule("192.168.1.0/24");
        assert!(r.matches("192.168.1.5"));
        assert!(!r.matches("192.168.2.5"));
    }

    #[test]
    fn cidr_partial_byte_mask() {
        let r = rule("172.16.0.0/12");
        assert!(r.matches("172.31.255.255"));
        assert!(!r.matches("172.32.0.1"));
    }

    #[test]
    fn cidr_ipv6() {
        let r = rule("2001:db8::/32");
        assert!(r.matches("2001:db8:1::1"));
        assert!(!r.matches("2001:db9::1"));
        assert!(!r.matches("10.0.0.1"));
    }

    #[test]
    fn cidr_zero_prefix_matches_family() {
        let r = rule("0.0.0.0/0");
        assert!(r.matches("8.8.8.8"));
        assert!(!r.matches("::2"));
    }

    #[test]
    fn rejects_prefix_wider_than_address() {
        assert!(IpRule::parse("10.0.0.0/33").is_err());
        assert!(IpRule::parse("::/129").is_err());
        assert!(IpRule::parse("::/128").is_ok());
    }

    #[test]
    fn loopback_aliases() {
        for entry in ["127.0.0.1", "::1", "localhost", "0:0:0:0:0:0:0:1"] {
            let r = rule(entry);
            assert_eq!(r, IpRule::Loopback);
            assert!(r.matches("127.0.0.1"));
            assert!(r.matches("::1"));
            assert!(r.matches("localhost"));
        }
    }

    #[test]
    fn other_loopback_addresses_are_not_aliases() {
        let r = rule("127.0.0.2");
        assert_eq!(r, IpRule::Exact("127.0.0.2".parse().unwrap()));
        assert!(r.matches("127.0.0.2"));
        assert!(!r.matches("127.0.0.1"));
        assert!(!r.matches("localhost"));

        let localhost = rule("localhost");
        assert!(!localhost.matches("127.0.0.2"));
        assert!(!localhost.matches("127.255.255.254"));
    }

    #[test]
    fn mapped_ipv6_is_stripped() {
        let r = rule("10.0.0.0/8");
        assert!(r.matches("::ffff:10.9.9.9"));
        assert!(rule("192.168.0.7").matches("::FFFF:192.168.0.7"));
    }

    #[test]
    fn wildcard_octets() {
        let r = rule("192.168.*.*");
        assert!(r.matches("192.168.40.2"));
        assert!(!r.matches("192.169.40.2"));
        assert!(!r.matches("::1"));
        assert!(IpRule::parse("192.168.*").is_err());
        assert!(IpRule::parse("192.300.*.*").is_err());
    }

    #[test]
    fn exact_match_and_unknown_client() {
        let r = rule("203.0.113.9");
        assert!(r.matches("203.0.113.9"));
        assert!(!r.matches("203.0.113.10"));
        assert!(!r.matches("unknown"));
    }

    #[test]
    fn garbage_entries_are_rejected() {
        assert!(IpRule::parse("example.com").is_err());
        assert!(IpRule::parse("10.0.0.0/abc").is_err());
    }
}
