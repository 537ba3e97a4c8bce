use portwatch_core::{Host, ParseError, PortStatus, ScanTarget, Snapshot};
use serde::Deserialize;
use std::net::IpAddr;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "@start")]
    start: Option<String>,
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, Deserialize)]
struct NmapHost {
    #[serde(rename = "address", default)]
    addresses: Vec<NmapAddress>,
    ports: Option<NmapPorts>,
}

#[derive(Debug, Deserialize)]
struct NmapAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addrtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NmapPorts {
    #[serde(rename = "port", default)]
    ports: Vec<NmapPort>,
}

#[derive(Debug, Deserialize)]
struct NmapPort {
    #[serde(rename = "@portid")]
    portid: String,
    state: NmapState,
}

#[derive(Debug, Deserialize)]
struct NmapState {
    #[serde(rename = "@state")]
    state: String,
}

/// Convert nmap `-oX` output into one snapshot per reported host.
///
/// `requested` is what the caller asked to scan; it is kept as the hostname
/// when nmap reports a different address.
pub fn parse_nmap_xml(raw: &[u8], requested: &ScanTarget) -> Result<Vec<Snapshot>, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let run: NmapRun = quick_xml::de::from_str(text).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let start = run.start.as_deref().ok_or_else(|| ParseError::Time("missing start attribute".into()))?;
    let secs: i64 = start.trim().parse().map_err(|_| ParseError::Time(start.to_string()))?;
    let observed_at = OffsetDateTime::from_unix_timestamp(secs).map_err(|e| ParseError::Time(e.to_string()))?;

    if run.hosts.is_empty() {
        return Err(ParseError::NoHost);
    }
    run.hosts.into_iter().map(|h| host_snapshot(h, requested, observed_at)).collect()
}

/// Like [`parse_nmap_xml`] but keeps only the first reported host.
pub fn parse_single(raw: &[u8], requested: &ScanTarget) -> Result<Snapshot, ParseError> {
    let mut snapshots = parse_nmap_xml(raw, requested)?;
    if snapshots.len() > 1 {
        debug!(target_name = %requested, hosts = snapshots.len(), "probe reported several hosts; keeping the first");
    }
    Ok(snapshots.swap_remove(0))
}

fn host_snapshot(h: NmapHost, requested: &ScanTarget, observed_at: OffsetDateTime) -> Result<Snapshot, ParseError> {
    // MAC addresses share the <address> element; only IP addresses identify a host.
    let addr = h
        .addresses
        .iter()
        .find(|a| matches!(a.addrtype.as_deref(), None | Some("ipv4") | Some("ipv6")))
        .ok_or(ParseError::NoHost)?;
    let ip: IpAddr = addr
        .addr
        .parse()
        .map_err(|_| ParseError::Malformed(format!("bad address: {}", addr.addr)))?;

    let mut host = Host::new(ip);
    if *requested != ScanTarget::Ip(ip) {
        host = host.with_hostname(requested.to_string());
    }

    let mut snapshot = Snapshot::new(host, observed_at);
    for p in h.ports.map(|p| p.ports).unwrap_or_default() {
        let port: u16 = p
            .portid
            .trim()
            .parse()
            .map_err(|_| ParseError::Malformed(format!("bad portid: {}", p.portid)))?;
        snapshot.ports.insert(port, p.state.state.parse()?);
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -p 0-1000 --open -oX - -T5 scanme.example.org" start="1700000000" startstr="Tue Nov 14 22:13:20 2023" version="7.94" xmloutputversion="1.05">
<scaninfo type="connect" protocol="tcp" numservices="1001" services="0-1000"/>
<verbose level="0"/>
<debugging level="0"/>
<host starttime="1700000000" endtime="1700000003"><status state="up" reason="syn-ack" reason_ttl="0"/>
<address addr="198.51.100.20" addrtype="ipv4"/>
<hostnames>
<hostname name="scanme.example.org" type="user"/>
</hostnames>
<ports><extraports state="closed" count="998">
<extrareasons reason="conn-refused" count="998" proto="tcp" ports="0-21,23-79,81-442,444-1000"/>
</extraports>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack" reason_ttl="0"/><service name="ssh" method="table" conf="3"/></port>
<port protocol="tcp" portid="80"><state state="open" reason="syn-ack" reason_ttl="0"/><service name="http" method="table" conf="3"/></port>
<port protocol="tcp" portid="443"><state state="filtered" reason="no-response" reason_ttl="0"/><service name="https" method="table" conf="3"/></port>
</ports>
<times srtt="1200" rttvar="900" to="100000"/>
</host>
<runstats><finished time="1700000003" timestr="Tue Nov 14 22:13:23 2023" summary="Nmap done; 1 IP address (1 host up) scanned in 3.01 seconds" elapsed="3.01" exit="success"/><hosts up="1" down="0" total="1"/>
</runstats>
</nmaprun>
"#;

    fn hostname(s: &str) -> ScanTarget {
        ScanTarget::Hostname(s.into())
    }

    #[test]
    fn parses_hostname_target() {
        let snap = parse_single(SAMPLE.as_bytes(), &hostname("scanme.example.org")).unwrap();
        assert_eq!(snap.ip(), "198.51.100.20".parse::<IpAddr>().unwrap());
        assert_eq!(snap.host.hostname.as_deref(), Some("scanme.example.org"));
        assert_eq!(snap.observed_at.unix_timestamp(), 1_700_000_000);
        assert_eq!(snap.ports.len(), 3);
        assert_eq!(snap.ports[&22], PortStatus::Open);
        assert_eq!(snap.ports[&443], PortStatus::Filtered);
    }

    #[test]
    fn ip_target_has_no_hostname() {
        let ip: IpAddr = "198.51.100.20".parse().unwrap();
        let snap = parse_single(SAMPLE.as_bytes(), &ScanTarget::Ip(ip)).unwrap();
        assert_eq!(snap.host.hostname, None);
    }

    #[test]
    fn host_without_open_ports() {
        let xml = r#"<nmaprun start="1700000100"><host><address addr="2001:db8::1" addrtype="ipv6"/></host></nmaprun>"#;
        let snap = parse_single(xml.as_bytes(), &hostname("v6.example.org")).unwrap();
        assert!(snap.ports.is_empty());
        assert_eq!(snap.ip(), "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn mac_address_is_skipped() {
        let xml = r#"<nmaprun start="1700000100"><host>
<address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/>
<address addr="192.168.1.9" addrtype="ipv4"/>
</host></nmaprun>"#;
        let snap = parse_single(xml.as_bytes(), &hostname("printer.lan")).unwrap();
        assert_eq!(snap.ip(), "192.168.1.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn no_host_reported() {
        let xml = r#"<nmaprun start="1700000100"><runstats><hosts up="0" down="1" total="1"/></runstats></nmaprun>"#;
        assert_eq!(parse_single(xml.as_bytes(), &hostname("down.example.org")), Err(ParseError::NoHost));
    }

    #[test]
    fn host_without_ip_address() {
        let xml = r#"<nmaprun start="1700000100"><host><address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/></host></nmaprun>"#;
        assert_eq!(parse_single(xml.as_bytes(), &hostname("x.lan")), Err(ParseError::NoHost));
    }

    #[test]
    fn bad_start_time() {
        let xml = r#"<nmaprun start="yesterday"><host><address addr="10.0.0.1" addrtype="ipv4"/></host></nmaprun>"#;
        assert!(matches!(parse_single(xml.as_bytes(), &hostname("a.lan")), Err(ParseError::Time(_))));
        let xml = r#"<nmaprun><host><address addr="10.0.0.1" addrtype="ipv4"/></host></nmaprun>"#;
        assert!(matches!(parse_single(xml.as_bytes(), &hostname("a.lan")), Err(ParseError::Time(_))));
    }

    #[test]
    fn malformed_output() {
        let xml = "<nmaprun start=\"1700000100\"><host>";
        assert!(matches!(parse_single(xml.as_bytes(), &hostname("a.lan")), Err(ParseError::Malformed(_))));
        assert!(matches!(parse_single(&[0xff, 0xfe], &hostname("a.lan")), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn unknown_state_fails_closed() {
        let xml = r#"<nmaprun start="1700000100"><host><address addr="10.0.0.1" addrtype="ipv4"/>
<ports><port protocol="tcp" portid="80"><state state="half-open"/></port></ports></host></nmaprun>"#;
        assert_eq!(
            parse_single(xml.as_bytes(), &hostname("a.lan")),
            Err(ParseError::UnknownStatus("half-open".into()))
        );
    }
}
