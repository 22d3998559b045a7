use vnet_wire::{AttrError, Attributes};

use crate::family::OvsMessage;

pub mod attr {
    pub const NAME: u16 = 1;
    pub const UPCALL_PID: u16 = 2;
    pub const STATS: u16 = 3;
    pub const MEGAFLOW_STATS: u16 = 4;
    pub const USER_FEATURES: u16 = 5;
}

/// Lookup counters of a datapath (`struct ovs_dp_stats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatapathStats {
    /// Packets that matched a flow.
    pub hit: u64,
    /// Packets sent to userspace for lack of a flow.
    pub missed: u64,
    /// Misses that couldn't be queued to userspace.
    pub lost: u64,
    pub flows: u64,
}

impl DatapathStats {
    const LEN: usize = 32;

    fn decode(attrs: &Attributes) -> Result<Option<Self>, AttrError> {
        let Some(raw) = attrs.get(attr::STATS) else {
            return Ok(None);
        };

        let words = u64_words::<4>(attr::STATS, raw.value())?;
        Ok(Some(Self { hit: words[0], missed: words[1], lost: words[2], flows: words[3] }))
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut raw = [0; Self::LEN];
        for (chunk, word) in raw.chunks_exact_mut(8).zip([self.hit, self.missed, self.lost, self.flows]) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        raw
    }
}

/// Reads `N` native-endian `u64`s from a fixed-size statistics attribute.
pub(crate) fn u64_words<const N: usize>(kind: u16, raw: &[u8]) -> Result<[u64; N], AttrError> {
    if raw.len() != N * 8 {
        return Err(AttrError::InvalidLength { kind, expected: N * 8, actual: raw.len() });
    }

    let mut words = [0; N];
    for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(8)) {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(chunk);
        *word = u64::from_ne_bytes(bytes);
    }
    Ok(words)
}

/// A kernel datapath: a switch instance identified by its interface index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datapath {
    pub index: i32,
    pub name: String,
    pub stats: Option<DatapathStats>,
    pub user_features: Option<u32>,
}

impl Datapath {
    pub(crate) fn decode(msg: &OvsMessage) -> Result<Self, AttrError> {
        Ok(Self {
            index: msg.dp_ifindex,
            name: msg.attrs.string(attr::NAME)?.to_owned(),
            stats: DatapathStats::decode(&msg.attrs)?,
            user_features: msg.attrs.opt_u32(attr::USER_FEATURES)?,
        })
    }
}
