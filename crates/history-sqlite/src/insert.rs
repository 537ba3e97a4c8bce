use crate::models::to_ms;
use crate::SqliteHistory;
use anyhow::{Context, Result};
use portwatch_core::{ChangeSet, Snapshot};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

impl SqliteHistory {
    /// Write one snapshot and its change set in a single IMMEDIATE
    /// transaction: host row, current-state rows, history rows, change rows.
    /// Any failure rolls the whole write back.
    ///
    /// A snapshot older than the host's last observation is appended to
    /// history only: it leaves the current state alone and records no
    /// changes, since those were diffed against a newer state. Equal
    /// timestamps count as newer, so the later write wins.
    pub fn persist_snapshot(&self, snapshot: &Snapshot, changes: &ChangeSet) -> Result<()> {
        let mut conn = self.connect()?;
        // IMMEDIATE takes the write lock up front, so the existence check
        // below cannot race another writer for the same host.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ip = snapshot.ip().to_string();
        let at = to_ms(snapshot.observed_at);

        let last_observed = last_observed_ms(&tx, &ip)?;
        let is_current = last_observed.map_or(true, |prev| at >= prev);
        upsert_host(&tx, &ip, snapshot.host.hostname.as_deref(), at, last_observed)?;
        if is_current {
            write_current_state(&tx, &ip, snapshot, at)?;
        } else {
            debug!(%ip, at, ?last_observed, "late snapshot; current state and change log kept");
        }
        append_history(&tx, &ip, snapshot, at)?;
        if is_current {
            append_changes(&tx, &ip, changes, at)?;
        }

        tx.commit().context("commit snapshot")?;
        debug!(%ip, ports = snapshot.ports.len(), changes = changes.len(), "snapshot persisted");
        Ok(())
    }
}

fn last_observed_ms(tx: &Transaction<'_>, ip: &str) -> Result<Option<i64>> {
    let v = tx
        .query_row("SELECT last_observed_ms FROM hosts WHERE ip_address=?", [ip], |r| r.get(0))
        .optional()?;
    Ok(v)
}

fn upsert_host(tx: &Transaction<'_>, ip: &str, hostname: Option<&str>, at: i64, last_observed: Option<i64>) -> Result<()> {
    match last_observed {
        None => {
            tx.execute(
                "INSERT INTO hosts(ip_address,hostname,first_seen_ms,last_observed_ms) VALUES (?,?,?,?)",
                params![ip, hostname, at, at],
            )
            .context("insert host")?;
        }
        Some(_) => {
            tx.execute(
                "UPDATE hosts SET hostname=COALESCE(?,hostname), last_observed_ms=MAX(last_observed_ms,?), first_seen_ms=MIN(first_seen_ms,?) WHERE ip_address=?",
                params![hostname, at, at, ip],
            )
            .context("update host")?;
        }
    }
    Ok(())
}

fn write_current_state(tx: &Transaction<'_>, ip: &str, snapshot: &Snapshot, at: i64) -> Result<()> {
    let mut upsert = tx.prepare_cached(
        "INSERT INTO port_state(ip_address,port,status,observed_ms) VALUES (?,?,?,?)
         ON CONFLICT(ip_address,port) DO UPDATE SET status=excluded.status, observed_ms=excluded.observed_ms",
    )?;
    for obs in snapshot.observations() {
        upsert
            .execute(params![ip, obs.port as i64, obs.status.as_str(), at])
            .with_context(|| format!("write current state for port {}", obs.port))?;
    }

    let stale: Vec<i64> = {
        let mut stmt = tx.prepare_cached("SELECT port FROM port_state WHERE ip_address=?")?;
        let ports = stmt.query_map([ip], |r| r.get::<_, i64>(0))?;
        let mut stale = Vec::new();
        for p in ports {
            let p = p?;
            if !u16::try_from(p).is_ok_and(|p| snapshot.ports.contains_key(&p)) {
                stale.push(p);
            }
        }
        stale
    };
    let mut delete = tx.prepare_cached("DELETE FROM port_state WHERE ip_address=? AND port=?")?;
    for p in stale {
        delete.execute(params![ip, p])?;
    }
    Ok(())
}

fn append_history(tx: &Transaction<'_>, ip: &str, snapshot: &Snapshot, at: i64) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO port_history(ip_address,port,status,observed_ms) VALUES (?,?,?,?)",
    )?;
    for obs in snapshot.observations() {
        stmt.execute(params![ip, obs.port as i64, obs.status.as_str(), at])
            .with_context(|| format!("append history for port {}", obs.port))?;
    }
    Ok(())
}

fn append_changes(tx: &Transaction<'_>, ip: &str, changes: &ChangeSet, at: i64) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO port_changes(ip_address,port,change_kind,observed_ms) VALUES (?,?,?,?)",
    )?;
    for rec in changes.records() {
        stmt.execute(params![ip, rec.port as i64, rec.kind.as_str(), at])
            .with_context(|| format!("append change for port {}", rec.port))?;
    }
    Ok(())
}
