use anyhow::{anyhow, Result};
use portwatch_core::ChangeKind;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Row of the `hosts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRow {
    pub ip_address: String,
    pub hostname: Option<String>,
    pub first_seen_ms: i64,
    pub last_observed_ms: i64,
}

/// Row of the append-only `port_changes` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRow {
    pub port: u16,
    pub change_kind: ChangeKind,
    pub observed_ms: i64,
}

pub(crate) fn to_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_ms(ms: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|e| anyhow!("stored timestamp {ms} out of range: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn millis_round_trip() {
        let at = datetime!(2024-05-01 12:30:45.250 UTC);
        assert_eq!(from_ms(to_ms(at)).unwrap(), at);
    }
}
