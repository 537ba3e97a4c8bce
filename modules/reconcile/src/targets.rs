use portwatch_core::{Error, Result, ScanTarget};
use regex::Regex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::OnceLock;

fn hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // RFC 1123 labels, at most 253 characters overall (checked separately).
    RE.get_or_init(|| {
        Regex::new(r"^(?i)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*\.?$")
            .expect("static regex")
    })
}

/// Parse one raw target as an IP literal or a hostname.
pub fn parse_target(raw: &str) -> Result<ScanTarget> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::Validation("empty target".into()));
    }
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Ok(ScanTarget::Ip(ip));
    }
    if s.len() > 253 || !hostname_re().is_match(s) {
        return Err(Error::Validation(format!("invalid target: {s:?}")));
    }
    Ok(ScanTarget::Hostname(s.trim_end_matches('.').to_ascii_lowercase()))
}

/// Validate a batch. Duplicates are dropped keeping the first occurrence; an
/// empty batch or any invalid entry rejects the whole batch.
pub fn parse_targets<S: AsRef<str>>(raw: &[S]) -> Result<Vec<ScanTarget>> {
    if raw.is_empty() {
        return Err(Error::Validation("no targets given".into()));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for r in raw {
        let t = parse_target(r.as_ref())?;
        if seen.insert(t.clone()) {
            out.push(t);
        }
    }
    Ok(out)
}

/// Read targets from a list file: one per line, `#` starts a comment.
pub fn parse_target_list(text: &str) -> Result<Vec<ScanTarget>> {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .collect();
    parse_targets(&lines)
}
