use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use super::Outcome;
use crate::explain::{Comparison, Field, Reason};

/// Dotted quad with four decimal octets in 0-255. Leading zeros are
/// accepted and read as decimal (`010` is 10).
pub(crate) fn parse_ipv4(addr: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = addr.trim().split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

/// Prefix length made of digits only, at most `max`.
pub(crate) fn parse_prefix(prefix: &str, max: u8) -> Option<u8> {
    let prefix = prefix.trim();
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse::<u8>().ok().filter(|p| *p <= max)
}

/// Parse `a.b.c.d/prefix` into a network, host bits cleared.
fn parse_ipv4_cidr(cidr: &str) -> Option<Ipv4Net> {
    let (addr, prefix) = cidr.trim().split_once('/')?;
    let net = Ipv4Net::new(parse_ipv4(addr)?, parse_prefix(prefix, 32)?).ok()?;
    Some(net.trunc())
}

/// `first - last` addresses covered by a network
fn ipv4_range(net: &Ipv4Net) -> String {
    format!("{} - {}", net.network(), net.broadcast())
}

/// IPv4 CIDR membership with 32-bit masking. Prefix 0 matches every address.
pub(super) fn ipv4_cidr(field: Field, ip: Option<&str>, cidr: &str) -> Outcome {
    let Some(net) = parse_ipv4_cidr(cidr) else {
        return Outcome::invalid_operand("IPv4 CIDR", cidr);
    };
    let Some(ip) = ip else {
        return Outcome::missing(field);
    };
    let range = Some(ipv4_range(&net));
    let Some(addr) = parse_ipv4(ip) else {
        return Outcome::invalid_operand("IPv4 address", ip)
            .with_content(ip)
            .with_range(range);
    };

    let mask = u32::from(net.netmask());
    let matched = (u32::from(addr) & mask) == (u32::from(net.network()) & mask);

    Outcome::new(
        matched,
        Reason::Compare {
            field,
            actual: ip.to_string(),
            op: Comparison::InCidr,
            expected: cidr.to_string(),
        },
    )
    .with_content(ip)
    .with_range(range)
}

/// Expand an IPv6 address into its 128-bit string.
///
/// Each colon-separated group is zero-padded to four hex digits and missing
/// trailing groups are filled with zeros. `::` is not expanded in place, so
/// `::1` and `0:0:0:0:0:0:0:1` do not compare equal.
fn ipv6_bits(addr: &str) -> Option<String> {
    let mut groups: Vec<String> = Vec::with_capacity(8);
    for group in addr.trim().split(':') {
        if group.len() > 4 {
            return None;
        }
        groups.push(format!("{:0>4}", group));
    }
    groups.resize(8, "0000".to_string());
    groups.truncate(8);

    let mut bits = String::with_capacity(128);
    for c in groups.concat().chars() {
        let nibble = c.to_digit(16)?;
        bits.push_str(&format!("{:04b}", nibble));
    }
    Some(bits)
}

/// Simplified IPv6 CIDR comparison on the first `prefix` bits.
pub(super) fn ipv6_cidr(field: Field, ip: Option<&str>, cidr: &str) -> Outcome {
    let parsed = cidr.trim().split_once('/').and_then(|(addr, prefix)| {
        let prefix = usize::from(parse_prefix(prefix, 128)?);
        Some((ipv6_bits(addr)?, prefix))
    });
    let Some((network, prefix)) = parsed else {
        return Outcome::invalid_operand("IPv6 CIDR", cidr);
    };
    let Some(ip) = ip else {
        return Outcome::missing(field);
    };
    let Some(addr) = ipv6_bits(ip) else {
        return Outcome::invalid_operand("IPv6 address", ip).with_content(ip);
    };

    Outcome::new(
        addr[..prefix] == network[..prefix],
        Reason::Compare {
            field,
            actual: ip.to_string(),
            op: Comparison::InCidr,
            expected: cidr.to_string(),
        },
    )
    .with_content(ip)
}

/// SRC-IP-CIDR / DST-IP-CIDR: picks the request address of the CIDR's family.
pub(super) fn family_cidr(
    field: Field,
    ipv4: Option<&str>,
    ipv6: Option<&str>,
    cidr: &str,
) -> Outcome {
    if cidr.contains(':') {
        ipv6_cidr(field, ipv6, cidr)
    } else {
        ipv4_cidr(field, ipv4, cidr)
    }
}
