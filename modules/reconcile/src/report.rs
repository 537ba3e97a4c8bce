use portwatch_core::{ChangeSet, Error, FailureKind, HistoricalSeries, ScanTarget, SeriesPoint, Snapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Pipeline position of one target. Every target ends `Reported` or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collected,
    Diffed,
    Persisted,
    Reported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostReport {
    pub snapshot: Snapshot,
    pub changes: ChangeSet,
    pub series: HistoricalSeries,
    /// No prior observation of this IP existed.
    pub first_seen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Last stage reached before failing; `None` when the probe itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Stage>,
}

impl TargetFailure {
    pub fn new(err: &Error, after: Option<Stage>) -> Self {
        TargetFailure { kind: err.kind(), message: err.public_message(), after }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Reported(HostReport),
    Failed(TargetFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetOutcome {
    pub target: ScanTarget,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl TargetOutcome {
    pub fn report(&self) -> Option<&HostReport> {
        match &self.outcome {
            Outcome::Reported(r) => Some(r),
            Outcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&TargetFailure> {
        match &self.outcome {
            Outcome::Failed(f) => Some(f),
            Outcome::Reported(_) => None,
        }
    }
}

/// Outcome of one batch, one entry per target in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub targets: Vec<TargetOutcome>,
}

impl ReconciliationResult {
    pub fn reported(&self) -> impl Iterator<Item = &HostReport> {
        self.targets.iter().filter_map(TargetOutcome::report)
    }

    pub fn failed(&self) -> usize {
        self.targets.iter().filter(|t| t.failure().is_some()).count()
    }

    /// Series of every reported host grouped by IP then port. Two targets
    /// resolving to one IP are merged; the later series wins per port.
    pub fn historical_scan_data(&self) -> BTreeMap<IpAddr, BTreeMap<u16, Vec<SeriesPoint>>> {
        let mut out: BTreeMap<IpAddr, BTreeMap<u16, Vec<SeriesPoint>>> = BTreeMap::new();
        for r in self.reported() {
            let ports = out.entry(r.series.ip).or_default();
            for (port, points) in &r.series.ports {
                ports.insert(*port, points.clone());
            }
        }
        out
    }
}
