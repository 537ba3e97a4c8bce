//! Port observation via an external nmap subprocess, and parsing of its XML
//! output into snapshots.

mod nmap;
mod parse;

pub use nmap::{NmapOptions, NmapProber};
pub use parse::{parse_nmap_xml, parse_single};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use portwatch_core::{ScanTarget, Snapshot};

/// Produces one snapshot per target. Implementations may block for the whole
/// probe run; callers bound them with a timeout and drop the future to abort.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn observe(&self, target: &ScanTarget) -> portwatch_core::Result<Snapshot>;
}

/// Parse a comma-separated list of ports/ranges (e.g., "22,80,443", "0-1000,8080").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse()?;
            let e: u16 = end.trim().parse()?;
            if s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            ports.push(part.parse()?);
        }
    }
    if ports.is_empty() {
        return Err(anyhow!("empty port specification"));
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_list() {
        let v = parse_ports("22,80,443").unwrap();
        assert_eq!(v, vec![22, 80, 443]);
    }

    #[test]
    fn parse_ranges_and_list() {
        let v = parse_ports("1-3,5,3").unwrap();
        assert_eq!(v, vec![1, 2, 3, 5]);
    }

    #[test]
    fn default_range_includes_port_zero() {
        let v = parse_ports("0-1000").unwrap();
        assert_eq!(v.len(), 1001);
        assert_eq!(v[0], 0);
    }

    #[test]
    fn reject_invalid() {
        assert!(parse_ports("10-5").is_err());
        assert!(parse_ports("70000").is_err());
        assert!(parse_ports(" , ").is_err());
    }
}
