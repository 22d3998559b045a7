//! Protocol numbers used for payload dispatch.

/// Ethertypes.
pub mod ether_type {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const VLAN: u16 = 0x8100;
    pub const IPV6: u16 = 0x86dd;
    pub const LLDP: u16 = 0x88cc;
}

/// IP protocol numbers.
pub mod ip_proto {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// Well-known UDP ports with a decoder.
pub mod udp_port {
    pub const DHCP_SERVER: u16 = 67;
    pub const DHCP_CLIENT: u16 = 68;

    /// Whether datagrams on `port` carry DHCP.
    #[inline]
    pub const fn is_dhcp(port: u16) -> bool {
        port == DHCP_SERVER || port == DHCP_CLIENT
    }
}
