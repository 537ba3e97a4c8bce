use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::ParseError;

/// A validated scan target as requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanTarget {
    Ip(IpAddr),
    Hostname(String),
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Ip(ip) => write!(f, "{ip}"),
            ScanTarget::Hostname(h) => f.write_str(h),
        }
    }
}

impl From<IpAddr> for ScanTarget {
    fn from(ip: IpAddr) -> Self {
        ScanTarget::Ip(ip)
    }
}

/// Host identity. The IP address is the join key everywhere; the hostname is
/// informational and only set when the requested name differs from the IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub ip: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Host {
    pub fn new(ip: IpAddr) -> Self {
        Host { ip, hostname: None }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// Port state as reported by the probing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "filtered")]
    Filtered,
    #[serde(rename = "unfiltered")]
    Unfiltered,
    #[serde(rename = "open|filtered")]
    OpenFiltered,
    #[serde(rename = "closed|filtered")]
    ClosedFiltered,
}

impl PortStatus {
    pub const ALL: [PortStatus; 6] = [
        PortStatus::Open,
        PortStatus::Closed,
        PortStatus::Filtered,
        PortStatus::Unfiltered,
        PortStatus::OpenFiltered,
        PortStatus::ClosedFiltered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::Open => "open",
            PortStatus::Closed => "closed",
            PortStatus::Filtered => "filtered",
            PortStatus::Unfiltered => "unfiltered",
            PortStatus::OpenFiltered => "open|filtered",
            PortStatus::ClosedFiltered => "closed|filtered",
        }
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PortStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s.trim())
            .ok_or_else(|| ParseError::UnknownStatus(s.to_string()))
    }
}

/// One port and the status it was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortObservation {
    pub port: u16,
    pub status: PortStatus,
}

/// One host's port state at a single point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub host: Host,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub ports: BTreeMap<u16, PortStatus>,
}

impl Snapshot {
    pub fn new(host: Host, observed_at: OffsetDateTime) -> Self {
        Snapshot { host, observed_at, ports: BTreeMap::new() }
    }

    pub fn with_port(mut self, port: u16, status: PortStatus) -> Self {
        self.ports.insert(port, status);
        self
    }

    pub fn ip(&self) -> IpAddr {
        self.host.ip
    }

    pub fn observations(&self) -> impl Iterator<Item = PortObservation> + '_ {
        self.ports.iter().map(|(&port, &status)| PortObservation { port, status })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Updated => "updated",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(ChangeKind::Added),
            "removed" => Ok(ChangeKind::Removed),
            "updated" => Ok(ChangeKind::Updated),
            other => Err(ParseError::Malformed(format!("unknown change kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub port: u16,
    pub kind: ChangeKind,
}

/// Classified differences between two snapshots of one host, at most one per
/// port. Serializes as a `port -> kind` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<u16, ChangeKind>);

impl ChangeSet {
    pub fn new() -> Self {
        ChangeSet::default()
    }

    pub fn insert(&mut self, port: u16, kind: ChangeKind) {
        self.0.insert(port, kind);
    }

    pub fn get(&self, port: u16) -> Option<ChangeKind> {
        self.0.get(&port).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records in ascending port order.
    pub fn records(&self) -> impl Iterator<Item = ChangeRecord> + '_ {
        self.0.iter().map(|(&port, &kind)| ChangeRecord { port, kind })
    }
}

impl FromIterator<ChangeRecord> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = ChangeRecord>>(iter: I) -> Self {
        ChangeSet(iter.into_iter().map(|r| (r.port, r.kind)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub status: PortStatus,
}

/// Time-ordered status history of selected ports of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalSeries {
    pub ip: IpAddr,
    pub ports: BTreeMap<u16, Vec<SeriesPoint>>,
}

impl HistoricalSeries {
    pub fn empty(ip: IpAddr) -> Self {
        HistoricalSeries { ip, ports: BTreeMap::new() }
    }

    pub fn points(&self, port: u16) -> &[SeriesPoint] {
        self.ports.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }
}
