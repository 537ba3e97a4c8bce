//! Error taxonomy for reconciliation.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that can end a target's pipeline, or a whole batch for
/// `Validation`.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed target list. Rejected before any processing.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("could not parse probe output: {0}")]
    Parse(#[from] ParseError),

    /// The snapshot write was rolled back; prior state is untouched.
    #[error("persistence failed: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed output: {0}")]
    Malformed(String),

    #[error("no host address reported")]
    NoHost,

    #[error("invalid run timestamp: {0}")]
    Time(String),

    #[error("unknown port status: {0:?}")]
    UnknownStatus(String),
}

/// Coarse classification exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Unreachable,
    Timeout,
    Cancelled,
    Parse,
    Persistence,
    Internal,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Validation(_) => FailureKind::Validation,
            Error::Probe(ProbeError::Timeout(_)) => FailureKind::Timeout,
            Error::Probe(ProbeError::Cancelled) => FailureKind::Cancelled,
            Error::Probe(_) => FailureKind::Unreachable,
            // nmap exits 0 with no <host> for down or unresolvable targets.
            Error::Parse(ParseError::NoHost) => FailureKind::Unreachable,
            Error::Parse(_) => FailureKind::Parse,
            Error::Persistence(_) => FailureKind::Persistence,
            Error::Internal(_) => FailureKind::Internal,
        }
    }

    /// Message safe to return to clients. Storage and internal causes are not
    /// included.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::Probe(ProbeError::Timeout(d)) => format!("probe timed out after {}s", d.as_secs()),
            Error::Probe(ProbeError::Cancelled) => "probe cancelled".into(),
            Error::Probe(_) => "could not reach host".into(),
            Error::Parse(ParseError::NoHost) => "could not reach host".into(),
            Error::Parse(e) => format!("could not parse probe output: {e}"),
            Error::Persistence(_) => "could not persist scan results".into(),
            Error::Internal(_) => "internal error".into(),
        }
    }
}
