use crate::models::{from_ms, ChangeRow, HostRow};
use crate::SqliteHistory;
use anyhow::{Context, Result};
use portwatch_core::{HistoricalSeries, Host, PortStatus, SeriesPoint, Snapshot};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::net::IpAddr;

impl SqliteHistory {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connect()?;
        let cnt: i64 = conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn host(&self, ip: IpAddr) -> Result<Option<HostRow>> {
        host_row(&self.connect()?, &ip.to_string())
    }

    pub fn host_exists(&self, ip: IpAddr) -> Result<bool> {
        let conn = self.connect()?;
        let cnt: i64 = conn.query_row(
            "SELECT COUNT(1) FROM hosts WHERE ip_address=?",
            [ip.to_string()],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    /// Current state of a host, read from the current-state table. The table
    /// holds at most one row per port: the one from the snapshot with the
    /// greatest timestamp, with later writes winning on equal timestamps.
    pub fn current_snapshot(&self, ip: IpAddr) -> Result<Option<Snapshot>> {
        let mut conn = self.connect()?;
        // Host row and port rows must come from the same committed state.
        let tx = conn.transaction()?;
        let key = ip.to_string();
        let Some(row) = host_row(&tx, &key)? else { return Ok(None); };

        let mut snapshot = Snapshot::new(
            Host { ip, hostname: row.hostname },
            from_ms(row.last_observed_ms)?,
        );
        let mut stmt = tx.prepare("SELECT port, status FROM port_state WHERE ip_address=? ORDER BY port")?;
        let rows = stmt.query_map([&key], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?;
        for row in rows {
            let (port, status) = row?;
            let port = u16::try_from(port).with_context(|| format!("stored port {port} out of range"))?;
            let status: PortStatus = status.parse()?;
            snapshot.ports.insert(port, status);
        }
        Ok(Some(snapshot))
    }

    /// History of `ports` on a host, oldest first. Rows sharing a timestamp
    /// keep insertion order.
    pub fn port_series(&self, ip: IpAddr, ports: &BTreeSet<u16>) -> Result<HistoricalSeries> {
        let mut series = HistoricalSeries::empty(ip);
        if ports.is_empty() {
            return Ok(series);
        }
        for &p in ports {
            series.ports.insert(p, Vec::new());
        }

        let placeholders = vec!["?"; ports.len()].join(",");
        let sql = format!(
            "SELECT port, status, observed_ms FROM port_history
             WHERE ip_address=? AND port IN ({placeholders})
             ORDER BY port, observed_ms, history_id"
        );
        let mut args = Vec::with_capacity(ports.len() + 1);
        args.push(Value::Text(ip.to_string()));
        args.extend(ports.iter().map(|&p| Value::Integer(p as i64)));

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (port, status, observed_ms) = row?;
            let port = u16::try_from(port).with_context(|| format!("stored port {port} out of range"))?;
            let point = SeriesPoint { observed_at: from_ms(observed_ms)?, status: status.parse()? };
            series.ports.entry(port).or_default().push(point);
        }
        Ok(series)
    }

    /// Audit trail of recorded changes for a host, newest first.
    pub fn changes(&self, ip: IpAddr, limit: usize) -> Result<Vec<ChangeRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT port, change_kind, observed_ms FROM port_changes
             WHERE ip_address=? ORDER BY observed_ms DESC, change_id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(rusqlite::params![ip.to_string(), limit as i64], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (port, change_kind, observed_ms) = row?;
            let port = u16::try_from(port).with_context(|| format!("stored port {port} out of range"))?;
            out.push(ChangeRow { port, change_kind: change_kind.parse()?, observed_ms });
        }
        Ok(out)
    }
}

fn host_row(conn: &Connection, ip: &str) -> Result<Option<HostRow>> {
    let row = conn
        .query_row(
            "SELECT ip_address, hostname, first_seen_ms, last_observed_ms FROM hosts WHERE ip_address=?",
            [ip],
            |r| {
                Ok(HostRow {
                    ip_address: r.get(0)?,
                    hostname: r.get(1)?,
                    first_seen_ms: r.get(2)?,
                    last_observed_ms: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}
