mod open;
mod models;
mod insert;
mod query;
mod schema;

pub use open::SqliteHistory;
pub use models::*;

use anyhow::Result;
use portwatch_core::{ChangeSet, HistoricalSeries, HistoryStore, Snapshot};
use std::collections::BTreeSet;
use std::net::IpAddr;

impl HistoryStore for SqliteHistory {
    fn latest_snapshot(&self, ip: IpAddr) -> Result<Option<Snapshot>> {
        self.current_snapshot(ip)
    }

    fn series(&self, ip: IpAddr, ports: &BTreeSet<u16>) -> Result<HistoricalSeries> {
        self.port_series(ip, ports)
    }

    fn persist(&self, snapshot: &Snapshot, changes: &ChangeSet) -> Result<()> {
        self.persist_snapshot(snapshot, changes)
    }

    fn exists(&self, ip: IpAddr) -> Result<bool> {
        self.host_exists(ip)
    }
}
