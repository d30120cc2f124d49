//! IPv6 network arithmetic.
//!
//! Thin helpers over `ipnet::Ipv6Net` for the handful of operations the
//! allocators need: parsing with host bits masked, formatting, subnet
//! containment and "nth subnet of a given length inside a parent".

use std::net::{IpAddr, Ipv6Addr};

use ipnet::Ipv6Net;

/// An IPv6 network, always stored with host bits cleared
pub type CidrNetwork = Ipv6Net;

/// Width of an IPv6 address in bits
pub const IPV6_BIT_COUNT: u8 = 128;

/// Parse a network string such as `face:b00c::/56`.
///
/// Host bits are masked off, so `face:b00c::1/56` yields `face:b00c::/56`.
/// A bare address is treated as a /128. IPv4 input is rejected.
pub fn parse_network(value: &str) -> Result<CidrNetwork, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty network string".to_string());
    }

    let (addr_str, len_str) = match value.split_once('/') {
        Some((addr, len)) => (addr, Some(len)),
        None => (value, None),
    };

    let addr = match addr_str.parse::<IpAddr>() {
        Ok(IpAddr::V6(addr)) => addr,
        Ok(IpAddr::V4(_)) => return Err(format!("'{}' is not an IPv6 network", value)),
        Err(e) => return Err(format!("invalid address in '{}': {}", value, e)),
    };

    let prefix_len = match len_str {
        Some(len) => len
            .parse::<u8>()
            .map_err(|e| format!("invalid prefix length in '{}': {}", value, e))?,
        None => IPV6_BIT_COUNT,
    };

    Ipv6Net::new(addr, prefix_len)
        .map(|net| net.trunc())
        .map_err(|_| format!("prefix length {} out of range in '{}'", prefix_len, value))
}

/// Format a network the way it is stored in topology and config files
pub fn network_to_string(network: &CidrNetwork) -> String {
    network.to_string()
}

/// Returns true if `network` lies entirely inside `parent`
pub fn in_subnet(network: &CidrNetwork, parent: &CidrNetwork) -> bool {
    parent.contains(network)
}

/// Number of `/prefix_len` subnets inside a `/parent_len` network.
///
/// Returns None when `prefix_len < parent_len` or the count does not fit in
/// a `u128` (only `::/0` split into /128s).
pub fn prefix_space(parent_len: u8, prefix_len: u8) -> Option<u128> {
    if prefix_len < parent_len {
        return None;
    }
    1u128.checked_shl(u32::from(prefix_len - parent_len))
}

/// The `index`-th subnet of length `prefix_len` inside `parent`.
///
/// Returns None if `index` is past the last such subnet or the length is
/// invalid.
pub fn nth_prefix(parent: &CidrNetwork, prefix_len: u8, index: u128) -> Option<CidrNetwork> {
    if prefix_len > IPV6_BIT_COUNT {
        return None;
    }
    let count = prefix_space(parent.prefix_len(), prefix_len)?;
    if index >= count {
        return None;
    }

    let host_bits = u32::from(IPV6_BIT_COUNT - prefix_len);
    let offset = index.checked_shl(host_bits).unwrap_or(0);
    let base = u128::from(parent.network());
    Ipv6Net::new(Ipv6Addr::from(base | offset), prefix_len).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_masks_host_bits() {
        let net = parse_network("face:b00c::1/56").unwrap();
        assert_eq!(network_to_string(&net), "face:b00c::/56");
        assert_eq!(net.prefix_len(), 56);
    }

    #[test]
    fn test_parse_bare_address_is_host_route() {
        let net = parse_network("face:b00c::1").unwrap();
        assert_eq!(net.prefix_len(), 128);
    }

    #[test]
    fn test_parse_rejects_garbage_and_ipv4() {
        assert!(parse_network("blabla").is_err());
        assert!(parse_network("").is_err());
        assert!(parse_network("10.0.0.0/8").is_err());
        assert!(parse_network("face:b00c::/129").is_err());
        assert!(parse_network("face:b00c::/abc").is_err());
    }

    #[test]
    fn test_nth_prefix() {
        let seed = parse_network("face:b00c::/56").unwrap();
        assert_eq!(
            nth_prefix(&seed, 64, 0).unwrap(),
            parse_network("face:b00c::/64").unwrap()
        );
        assert_eq!(
            nth_prefix(&seed, 64, 1).unwrap(),
            parse_network("face:b00c:0:1::/64").unwrap()
        );
        assert_eq!(
            nth_prefix(&seed, 64, 255).unwrap(),
            parse_network("face:b00c:0:ff::/64").unwrap()
        );
        assert!(nth_prefix(&seed, 64, 256).is_none());
        assert_eq!(
            nth_prefix(&seed, 57, 1).unwrap(),
            parse_network("face:b00c:0:80::/57").unwrap()
        );
    }

    #[test]
    fn test_prefix_space() {
        assert_eq!(prefix_space(56, 64), Some(256));
        assert_eq!(prefix_space(63, 64), Some(2));
        assert_eq!(prefix_space(64, 56), None);
        assert_eq!(prefix_space(1, 128), Some(1u128 << 127));
        assert_eq!(prefix_space(0, 128), None);
    }

    #[test]
    fn test_in_subnet() {
        let seed = parse_network("face:b00c::/56").unwrap();
        assert!(in_subnet(&parse_network("face:b00c:0:ff::/64").unwrap(), &seed));
        assert!(in_subnet(&seed, &seed));
        assert!(!in_subnet(&parse_network("face:b00d::/64").unwrap(), &seed));
        assert!(!in_subnet(&parse_network("face:b00c::/48").unwrap(), &seed));
    }
}
