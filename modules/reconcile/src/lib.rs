//! Batch reconciliation: validate targets, probe them, diff against stored
//! history, persist, and report per-target outcomes.

mod reconciler;
mod report;
mod targets;

pub use reconciler::{ReconcileOptions, Reconciler};
pub use report::{HostReport, Outcome, ReconciliationResult, Stage, TargetFailure, TargetOutcome};
pub use targets::{parse_target, parse_target_list, parse_targets};
