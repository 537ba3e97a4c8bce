use anyhow::Result;
use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::model::{ChangeSet, HistoricalSeries, Snapshot};

/// Read/write access to persisted port state.
///
/// Methods block; async callers should run them on a blocking thread.
pub trait HistoryStore: Send + Sync + 'static {
    /// Most recent persisted state for a host, `None` for an unknown host.
    fn latest_snapshot(&self, ip: IpAddr) -> Result<Option<Snapshot>>;

    /// Time-ordered history restricted to `ports`. Every requested port is
    /// present in the result, with an empty series if never observed.
    fn series(&self, ip: IpAddr, ports: &BTreeSet<u16>) -> Result<HistoricalSeries>;

    /// Atomically record `snapshot` and its derived `changes`.
    fn persist(&self, snapshot: &Snapshot, changes: &ChangeSet) -> Result<()>;

    /// Advisory only. `persist` makes its own insert-or-update decision
    /// inside its write transaction.
    fn exists(&self, ip: IpAddr) -> Result<bool>;
}
