//! The Internet checksum (RFC 1071): the one's complement of the one's complement sum of
//! the data taken as big-endian 16-bit words.

use std::net::Ipv4Addr;

/// Adds `data` to a running sum. An odd trailing byte is padded with zero.
pub fn sum(data: &[u8], mut acc: u64) -> u64 {
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        acc += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        acc += u64::from(*last) << 8;
    }
    acc
}

/// Folds the carries back in (end-around carry) and complements.
pub fn finish(mut acc: u64) -> u16 {
    while acc >> 16 != 0 {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    !(acc as u16)
}

/// The checksum of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    finish(sum(data, 0))
}

/// The IPv4 addresses a transport checksum covers, handed down by the enclosing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PseudoHeader {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl PseudoHeader {
    pub const fn new(source: Ipv4Addr, destination: Ipv4Addr) -> Self {
        Self { source, destination }
    }

    /// Sum of the pseudo-header: addresses, zero, protocol and transport length.
    pub fn sum(&self, protocol: u8, length: u16) -> u64 {
        let acc = sum(&self.source.octets(), 0);
        let acc = sum(&self.destination.octets(), acc);
        acc + u64::from(protocol) + u64::from(length)
    }

    /// The transport checksum of `segment`, whose own checksum field must be zero.
    pub fn checksum(&self, protocol: u8, segment: &[u8]) -> u16 {
        finish(sum(segment, self.sum(protocol, segment.len() as u16)))
    }
}
