use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::warn;

use crate::error::DetectError;
use crate::packet::{PacketRecord, Proto, TcpFlags};

/// Source of parsed L3/L4 records. The engine is indifferent to whether
/// packets come from live capture, offline replay or a generator.
#[async_trait]
pub trait PacketSource: Send {
    /// The next record, or `None` at end of stream.
    async fn next_packet(&mut self) -> Result<Option<PacketRecord>, DetectError>;
}

/// Replays packets from a JSONL capture file, one record per line.
///
/// Malformed lines are dropped with a WARN and replay continues.
pub struct ReplaySource {
    lines: Lines<BufReader<File>>,
    dropped: u64,
}

impl ReplaySource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DetectError> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            dropped: 0,
        })
    }

    /// Lines dropped as malformed so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[async_trait]
impl PacketSource for ReplaySource {
    async fn next_packet(&mut self) -> Result<Option<PacketRecord>, DetectError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PacketRecord>(&line) {
                Ok(pkt) if pkt.is_valid() => return Ok(Some(pkt)),
                Ok(_) => {
                    self.dropped += 1;
                    warn!("replay record failed validation, dropped");
                }
                Err(e) => {
                    self.dropped += 1;
                    warn!(error = %e, "undecodable replay line dropped");
                }
            }
        }
    }
}

/// Traffic shape produced by the synthetic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticProfile {
    /// Short, small flows between random internal hosts.
    Benign,
    /// One source sweeping destination ports with tiny SYN packets.
    PortScan,
    /// A single high-volume flow pushing large packets at a tight cadence.
    Exfiltration,
}

/// Deterministic synthetic packet generator for tests, demos and load runs.
///
/// The same seed always yields the same packet sequence. An optional pace
/// inserts a real delay between packets for live demos; tests leave it off.
pub struct SyntheticSource {
    rng: StdRng,
    profile: SyntheticProfile,
    remaining: u64,
    clock: f64,
    pace: Option<Duration>,
    scan_port: u16,
}

impl SyntheticSource {
    #[must_use]
    pub fn new(profile: SyntheticProfile, packets: u64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            profile,
            remaining: packets,
            clock: 1_700_000_000.0,
            pace: None,
            scan_port: 1,
        }
    }

    /// Sleep this long between packets (live demo pacing).
    #[must_use]
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    fn internal_host(&mut self) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, self.rng.gen_range(2..250)))
    }

    fn generate(&mut self) -> PacketRecord {
        match self.profile {
            SyntheticProfile::Benign => {
                self.clock += self.rng.gen_range(0.05..0.5);
                PacketRecord {
                    ts: self.clock,
                    src_ip: self.internal_host(),
                    dst_ip: self.internal_host(),
                    proto: if self.rng.gen_bool(0.7) {
                        Proto::Tcp
                    } else {
                        Proto::Udp
                    },
                    src_port: self.rng.gen_range(1024..65535),
                    dst_port: *[80u16, 443, 53, 123]
                        .get(self.rng.gen_range(0..4))
                        .unwrap_or(&443),
                    size: self.rng.gen_range(60..600),
                    flags: TcpFlags(TcpFlags::ACK),
                }
            }
            SyntheticProfile::PortScan => {
                self.clock += 0.002;
                self.scan_port = self.scan_port.wrapping_add(1).max(1);
                PacketRecord {
                    ts: self.clock,
                    src_ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 66)),
                    dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
                    proto: Proto::Tcp,
                    src_port: 54321,
                    dst_port: self.scan_port,
                    size: 60,
                    flags: TcpFlags(TcpFlags::SYN),
                }
            }
            SyntheticProfile::Exfiltration => {
                self.clock += 0.01;
                PacketRecord {
                    ts: self.clock,
                    src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 23)),
                    dst_ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 9)),
                    proto: Proto::Tcp,
                    src_port: 40022,
                    dst_port: 443,
                    size: self.rng.gen_range(1200..1500),
                    flags: TcpFlags(TcpFlags::ACK | TcpFlags::PSH),
                }
            }
        }
    }
}

#[async_trait]
impl PacketSource for SyntheticSource {
    async fn next_packet(&mut self) -> Result<Option<PacketRecord>, DetectError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        // Sleep before consuming so a cancelled read loses no packet.
        if let Some(pace) = self.pace {
            tokio::time::sleep(pace).await;
        }
        self.remaining -= 1;
        Ok(Some(self.generate()))
    }
}
