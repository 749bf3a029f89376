//! CIDR arithmetic and address-suggestion helpers
//!
//! The store enforces uniqueness; these helpers only propose candidates
//! for the caller's allocate-check-retry loop and normalize
//! operator-entered CIDRs.

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use rand::Rng;

/// Base (all-host-bits-zero) address of an IPv6 network.
pub fn network_base_v6(net: &Ipv6Network) -> Ipv6Addr {
    Ipv6Addr::from(u128::from(net.ip()) & u128::from(net.mask()))
}

/// Base address of an IPv4 network.
pub fn network_base_v4(net: &Ipv4Network) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(net.ip()) & u32::from(net.mask()))
}

/// Normalize a network to its masked form: same prefix, address part
/// reduced to the network base. Operator-entered CIDRs are stored in
/// this canonical form.
pub fn masked_v6(net: &Ipv6Network) -> Ipv6Network {
    Ipv6Network::new(network_base_v6(net), net.prefix()).expect("prefix unchanged")
}

/// IPv4 counterpart of [`masked_v6`].
pub fn masked_v4(net: &Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(network_base_v4(net), net.prefix()).expect("prefix unchanged")
}

/// Two ranges overlap iff either network's base address falls inside the
/// other, i.e. their address intervals intersect.
pub fn overlaps_v6(a: &Ipv6Network, b: &Ipv6Network) -> bool {
    a.contains(network_base_v6(b)) || b.contains(network_base_v6(a))
}

/// True if `address` lies in the host portion of `scope`: inside the
/// range but neither the network nor the broadcast address.
pub fn is_usable_v4(scope: &Ipv4Network, address: Ipv4Addr) -> bool {
    scope.contains(address) && address != scope.network() && address != scope.broadcast()
}

/// Uniformly random address inside an IPv6 network.
pub fn random_address_v6(net: &Ipv6Network) -> Ipv6Addr {
    if net.prefix() >= 128 {
        return network_base_v6(net);
    }
    let host_mask = u128::MAX >> net.prefix();
    let offset = rand::thread_rng().gen_range(0..=host_mask);
    Ipv6Addr::from(u128::from(network_base_v6(net)) | offset)
}

/// Uniformly random address from the usable range of an IPv4 network,
/// or `None` if the network has no usable hosts.
pub fn random_usable_v4(scope: &Ipv4Network) -> Option<Ipv4Addr> {
    let first = u32::from(scope.network()).checked_add(1)?;
    let last = u32::from(scope.broadcast()).checked_sub(1)?;
    if first > last {
        return None;
    }
    Some(Ipv4Addr::from(rand::thread_rng().gen_range(first..=last)))
}

/// Random usable IPv4 address outside the reserved secure sub-scope.
/// Returns `None` when the scope has no usable hosts; callers should
/// bound their retry loop when the secure scope covers most of it.
pub fn random_usable_v4_outside(
    scope: &Ipv4Network,
    secure_scope: &Ipv4Network,
) -> Option<Ipv4Addr> {
    for _ in 0..1024 {
        let candidate = random_usable_v4(scope)?;
        if !secure_scope.contains(candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Random candidate subnet of the given prefix length carved out of an
/// IPv6 scope, already masked. `None` if the prefix does not fit inside
/// the scope.
pub fn random_subnet_v6(scope: &Ipv6Network, prefix: u8) -> Option<Ipv6Network> {
    if prefix < scope.prefix() || prefix > 128 {
        return None;
    }
    let net = Ipv6Network::new(random_address_v6(scope), prefix).ok()?;
    Some(masked_v6(&net))
}
