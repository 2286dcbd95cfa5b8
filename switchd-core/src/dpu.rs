use std::net::IpAddr;
use std::str::FromStr;

/// A stable, small identifier for a DPU (e.g. `0`, `1`), as carried in the
/// `x-sonic-ss-target-index` header and as a suffix of the key-value store
/// keys that describe it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DpuIndex(pub u32);

impl FromStr for DpuIndex {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(DpuIndex)
    }
}

impl std::fmt::Display for DpuIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A TCP port to try when dialing a DPU.
pub type DpuPort = u16;

/// What the resolver knows about a DPU at the moment of a single call.
/// Transient: never cached by the resolver itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DpuRecord {
    pub index: DpuIndex,
    pub address: IpAddr,
    pub reachable: bool,
    /// Configured primary port followed by well-known fallbacks, deduplicated,
    /// first-occurrence order preserved.
    pub ports: Vec<DpuPort>,
}

/// Failures surfaced by [`crate::dpu`] resolution. The caller (the gRPC
/// service boundary in `switchd-grpc`) maps each variant onto the RPC status
/// code named in spec.md §4.3 / §7.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("DPU{0} not found in chassis midplane table")]
    NotFound(DpuIndex),

    #[error("DPU{0} has no ip_address")]
    MissingIp(DpuIndex),

    #[error("DPU{0} lookup failed: {1}")]
    Internal(DpuIndex, String),
}

impl ResolveError {
    pub fn index(&self) -> DpuIndex {
        match self {
            Self::NotFound(i) | Self::MissingIp(i) | Self::Internal(i, _) => *i,
        }
    }
}
