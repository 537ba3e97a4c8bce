use crate::report::{HostReport, Outcome, ReconciliationResult, Stage, TargetFailure, TargetOutcome};
use anyhow::Context;
use portwatch_core::{diff, ChangeSet, Error, HistoryStore, HostLocks, ProbeError, ScanTarget, Snapshot};
use probe::Prober;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Targets processed concurrently.
    pub workers: usize,
    pub probe_timeout: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions { workers: 8, probe_timeout: Duration::from_secs(300) }
    }
}

/// Drives each target through probe, diff, persist and series lookup.
///
/// Targets run on a bounded pool. Work on one IP is serialized from the
/// latest-state read until the write commits; probes are never serialized.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn HistoryStore>,
    prober: Arc<dyn Prober>,
    locks: HostLocks,
    opts: ReconcileOptions,
}

impl Reconciler {
    pub fn new(store: Arc<dyn HistoryStore>, prober: Arc<dyn Prober>, opts: ReconcileOptions) -> Self {
        Reconciler { store, prober, locks: HostLocks::new(), opts }
    }

    /// Reconcile a batch of validated targets.
    ///
    /// Only an empty batch fails as a whole; every other failure is recorded
    /// against its target. Firing `cancel` aborts targets that are still
    /// waiting or probing; targets past the probe finish normally.
    pub async fn reconcile(
        &self,
        targets: Vec<ScanTarget>,
        cancel: CancellationToken,
    ) -> portwatch_core::Result<ReconciliationResult> {
        if targets.is_empty() {
            return Err(Error::Validation("no targets given".into()));
        }
        let run_id = Uuid::now_v7();
        let started_at = OffsetDateTime::now_utc();
        let span = info_span!("reconcile", %run_id, targets = targets.len());

        async move {
            info!(workers = self.opts.workers, "reconciliation started");
            let sem = Arc::new(Semaphore::new(self.opts.workers.max(1)));
            let mut handles = Vec::with_capacity(targets.len());
            for target in targets {
                let this = self.clone();
                let sem = sem.clone();
                let cancel = cancel.clone();
                let span = info_span!("target", target_name = %target);
                let t = target.clone();
                let h = tokio::spawn(
                    async move {
                        let permit = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            p = sem.acquire_owned() => p.ok(),
                        };
                        match permit {
                            Some(_permit) => this.run_target(t, &cancel).await,
                            None => failed(t, &Error::from(ProbeError::Cancelled), None),
                        }
                    }
                    .instrument(span),
                );
                handles.push((target, h));
            }

            let mut outcomes = Vec::with_capacity(handles.len());
            for (target, h) in handles {
                let outcome = match h.await {
                    Ok(o) => o,
                    Err(e) => {
                        error!(target_name = %target, error = %e, "target task failed");
                        failed(target, &Error::Internal(e.to_string()), None)
                    }
                };
                outcomes.push(outcome);
            }

            let result = ReconciliationResult { run_id, started_at, targets: outcomes };
            info!(failed = result.failed(), reported = result.reported().count(), "reconciliation finished");
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn run_target(&self, target: ScanTarget, cancel: &CancellationToken) -> TargetOutcome {
        let snapshot = match self.probe(&target, cancel).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "probe failed");
                return failed(target, &e, None);
            }
        };
        let ip = snapshot.ip();
        debug!(%ip, ports = snapshot.ports.len(), "collected");

        let guard = self.locks.lock(ip).await;
        let store = self.store.clone();
        let previous = match blocking(move || store.latest_snapshot(ip)).await {
            Ok(p) => p,
            Err(e) => return storage_failure(target, "read latest snapshot", e, Stage::Collected),
        };
        // A probe that started before the stored state has nothing to diff
        // against; it only extends history.
        let changes = match &previous {
            Some(prev) if snapshot.observed_at < prev.observed_at => {
                debug!(%ip, latest = %prev.observed_at, "late snapshot; no changes recorded");
                ChangeSet::new()
            }
            prev => diff(&snapshot, prev.as_ref()),
        };
        let first_seen = previous.is_none();
        debug!(%ip, changes = changes.len(), first_seen, "diffed");

        let store = self.store.clone();
        let (snap, ch) = (snapshot.clone(), changes.clone());
        if let Err(e) = blocking(move || store.persist(&snap, &ch)).await {
            let err = Error::Persistence(e);
            error!(%ip, error = %err, "persist failed; snapshot rolled back");
            return failed(target, &err, Some(Stage::Diffed));
        }
        drop(guard);
        debug!(%ip, "persisted");

        let ports: BTreeSet<u16> = snapshot.ports.keys().copied().collect();
        let store = self.store.clone();
        let series = match blocking(move || store.series(ip, &ports)).await {
            Ok(s) => s,
            Err(e) => return storage_failure(target, "read series", e, Stage::Persisted),
        };

        info!(%ip, ports = snapshot.ports.len(), changes = changes.len(), first_seen, "reported");
        TargetOutcome {
            target,
            outcome: Outcome::Reported(HostReport { snapshot, changes, series, first_seen }),
        }
    }

    async fn probe(&self, target: &ScanTarget, cancel: &CancellationToken) -> portwatch_core::Result<Snapshot> {
        let limit = self.opts.probe_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled.into()),
            r = tokio::time::timeout(limit, self.prober.observe(target)) => match r {
                Ok(r) => r,
                Err(_) => Err(ProbeError::Timeout(limit).into()),
            },
        }
    }
}

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.context("store task aborted")?
}

fn failed(target: ScanTarget, err: &Error, after: Option<Stage>) -> TargetOutcome {
    TargetOutcome { target, outcome: Outcome::Failed(TargetFailure::new(err, after)) }
}

fn storage_failure(target: ScanTarget, what: &str, e: anyhow::Error, after: Stage) -> TargetOutcome {
    error!(error = %format!("{e:#}"), "{what} failed");
    failed(target, &Error::Internal(what.to_string()), Some(after))
}
