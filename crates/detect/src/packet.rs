use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Transport protocol of a packet, reduced to the classes the feature
/// vector one-hot encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Tcp,
    Udp,
    Icmp,
    #[serde(other)]
    Other,
}

impl Proto {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP control flags seen on a packet, as a bit union.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;

    /// Union with another flag set.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

/// One parsed L3/L4 record from a packet source.
///
/// Extra fields in the input are ignored; the engine only needs these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Capture timestamp, Unix seconds.
    pub ts: f64,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub proto: Proto,
    #[serde(default)]
    pub src_port: u16,
    #[serde(default)]
    pub dst_port: u16,
    /// Wire size in bytes.
    pub size: u64,
    #[serde(default)]
    pub flags: TcpFlags,
}

impl PacketRecord {
    /// Basic sanity check; failing packets are dropped with a WARN counter.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ts.is_finite() && self.ts >= 0.0 && self.size > 0
    }
}
