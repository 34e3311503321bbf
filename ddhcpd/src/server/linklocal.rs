//! MAC -> link-local IPv6 derivation, for diagnostics only (the coordination
//! group itself is the well-known `ff02::1234`, not derived per-node).
//!
//! Grounded on `netsock.c: mac_to_ipv6` (modified EUI-64).
use std::net::Ipv6Addr;

/// Derive this interface's link-local `fe80::` address from its hardware
/// address using the modified-EUI-64 algorithm.
pub fn mac_to_link_local(mac: [u8; 6]) -> Ipv6Addr {
    let mut segments = [0u16; 8];
    segments[0] = 0xfe80;
    segments[4] = (u16::from(mac[0] ^ 0x02) << 8) | u16::from(mac[1]);
    segments[5] = (u16::from(mac[2]) << 8) | 0x00ff;
    segments[6] = 0xfe00 | u16::from(mac[3]);
    segments[7] = (u16::from(mac[4]) << 8) | u16::from(mac[5]);
    Ipv6Addr::new(
        segments[0], segments[1], segments[2], segments[3], segments[4], segments[5], segments[6],
        segments[7],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_the_universal_local_bit() {
        let addr = mac_to_link_local([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(addr, "fe80::211:22ff:fe33:4455".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn xor_bit_already_set_still_flips_back() {
        let addr = mac_to_link_local([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(addr.segments()[4], 0x0000);
    }
}
