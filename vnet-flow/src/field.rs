use bitflags::bitflags;

/// The fields a [`WildcardMatch`](crate::WildcardMatch) can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Field {
    InputPort,
    TunnelId,
    TunnelSource,
    TunnelDestination,
    EthernetSource,
    EthernetDestination,
    EtherType,
    VlanId,
    NetworkSource,
    NetworkDestination,
    NetworkProtocol,
    NetworkTtl,
    NetworkTos,
    FragmentType,
    TransportSource,
    TransportDestination,
}

impl Field {
    pub const ALL: [Self; 16] = [
        Self::InputPort,
        Self::TunnelId,
        Self::TunnelSource,
        Self::TunnelDestination,
        Self::EthernetSource,
        Self::EthernetDestination,
        Self::EtherType,
        Self::VlanId,
        Self::NetworkSource,
        Self::NetworkDestination,
        Self::NetworkProtocol,
        Self::NetworkTtl,
        Self::NetworkTos,
        Self::FragmentType,
        Self::TransportSource,
        Self::TransportDestination,
    ];
}

bitflags! {
    /// A set of [`Field`]s, one bit per field in declaration order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldSet: u32 {
        const INPUT_PORT = 1 << Field::InputPort as u8;
        const TUNNEL_ID = 1 << Field::TunnelId as u8;
        const TUNNEL_SOURCE = 1 << Field::TunnelSource as u8;
        const TUNNEL_DESTINATION = 1 << Field::TunnelDestination as u8;
        const ETHERNET_SOURCE = 1 << Field::EthernetSource as u8;
        const ETHERNET_DESTINATION = 1 << Field::EthernetDestination as u8;
        const ETHER_TYPE = 1 << Field::EtherType as u8;
        const VLAN_ID = 1 << Field::VlanId as u8;
        const NETWORK_SOURCE = 1 << Field::NetworkSource as u8;
        const NETWORK_DESTINATION = 1 << Field::NetworkDestination as u8;
        const NETWORK_PROTOCOL = 1 << Field::NetworkProtocol as u8;
        const NETWORK_TTL = 1 << Field::NetworkTtl as u8;
        const NETWORK_TOS = 1 << Field::NetworkTos as u8;
        const FRAGMENT_TYPE = 1 << Field::FragmentType as u8;
        const TRANSPORT_SOURCE = 1 << Field::TransportSource as u8;
        const TRANSPORT_DESTINATION = 1 << Field::TransportDestination as u8;
    }
}

impl FieldSet {
    pub const fn with(self, field: Field) -> Self {
        self.union(Self::from_field(field))
    }

    pub const fn has(&self, field: Field) -> bool {
        self.contains(Self::from_field(field))
    }

    pub const fn len(&self) -> usize {
        self.bits().count_ones() as usize
    }

    pub const fn is_subset(&self, other: &Self) -> bool {
        other.contains(*self)
    }

    /// Iterates the fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|field| self.has(*field))
    }

    const fn from_field(field: Field) -> Self {
        Self::from_bits_retain(1 << field as u8)
    }
}

impl From<Field> for FieldSet {
    fn from(field: Field) -> Self {
        Self::from_field(field)
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl<const N: usize> From<[Field; N]> for FieldSet {
    fn from(fields: [Field; N]) -> Self {
        fields.into_iter().collect()
    }
}
