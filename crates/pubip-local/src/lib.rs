// # Local Address Lookup
//
// This crate finds the host's own private (internal) address, the one its
// interfaces carry behind a NAT, as a companion to the external address the
// resolver reports.
//
// ## Platform Support
//
// Interface enumeration goes through the `netdev` crate, which covers Linux,
// macOS, Windows and the BSDs.

use pubip_core::{Error, IpFamily, Result};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, trace};

/// An address as seen on one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// Interface name (e.g. "eth0")
    pub interface: String,
    pub address: IpAddr,
    pub up: bool,
    pub loopback: bool,
}

/// First private address of `family` on an interface that is up and not
/// loopback.
///
/// Private means RFC 1918 for IPv4 and unique-local (fc00::/7) for IPv6.
pub fn private_address(family: IpFamily) -> Result<IpAddr> {
    first_private(interface_addresses(), family).ok_or_else(|| {
        Error::not_retrieved(format!("No private {} address on any interface", family))
    })
}

/// Every address on every interface, in enumeration order
pub fn interface_addresses() -> Vec<InterfaceAddress> {
    let mut addresses = Vec::new();

    for iface in netdev::get_interfaces() {
        let up = iface.is_up();
        let loopback = iface.is_loopback();
        trace!(interface = %iface.name, up, loopback, "Enumerated interface");

        let v4 = iface.ipv4.iter().map(|net| IpAddr::V4(net.addr()));
        let v6 = iface.ipv6.iter().map(|net| IpAddr::V6(net.addr()));

        for address in v4.chain(v6) {
            addresses.push(InterfaceAddress {
                interface: iface.name.clone(),
                address,
                up,
                loopback,
            });
        }
    }

    addresses
}

fn first_private(
    addresses: impl IntoIterator<Item = InterfaceAddress>,
    family: IpFamily,
) -> Option<IpAddr> {
    addresses
        .into_iter()
        .filter(|a| a.up && !a.loopback)
        .find(|a| family.matches(&a.address) && is_private(&a.address))
        .inspect(|a| debug!(interface = %a.interface, address = %a.address, "Found private address"))
        .map(|a| a.address)
}

/// RFC 1918 or unique-local
pub fn is_private(address: &IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_unique_local(v6),
    }
}

fn is_private_v4(address: &Ipv4Addr) -> bool {
    address.is_private()
}

fn is_unique_local(address: &Ipv6Addr) -> bool {
    (address.segments()[0] & 0xfe00) == 0xfc00
}
