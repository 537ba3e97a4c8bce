use crate::{parse_single, Prober};
use async_trait::async_trait;
use portwatch_core::{ProbeError, ScanTarget, Snapshot};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const STDERR_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct NmapOptions {
    pub binary: String,
    /// Port specification passed to `-p`, e.g. "0-1000".
    pub ports: String,
    /// Timing template 0..=5 passed as `-T<n>`.
    pub timing: u8,
}

impl Default for NmapOptions {
    fn default() -> Self {
        NmapOptions { binary: "nmap".into(), ports: "0-1000".into(), timing: 5 }
    }
}

/// Runs one nmap process per target and parses its XML report.
///
/// The child is killed if the returned future is dropped, so a caller-side
/// timeout or cancellation never leaves a stray scan running.
#[derive(Debug, Clone, Default)]
pub struct NmapProber {
    opts: NmapOptions,
}

impl NmapProber {
    pub fn new(opts: NmapOptions) -> Self {
        NmapProber { opts }
    }

    fn command(&self, target: &ScanTarget) -> Command {
        let mut cmd = Command::new(&self.opts.binary);
        cmd.arg("-p")
            .arg(&self.opts.ports)
            .arg("--open")
            .args(["--stats-every", "0"])
            .args(["-oX", "-"])
            .arg(format!("-T{}", self.opts.timing))
            .arg(target.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Prober for NmapProber {
    async fn observe(&self, target: &ScanTarget) -> portwatch_core::Result<Snapshot> {
        debug!(target_name = %target, binary = %self.opts.binary, "starting probe");
        let output = self
            .command(target)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn { binary: self.opts.binary.clone(), source })?;

        if !output.status.success() {
            let stderr = truncate(String::from_utf8_lossy(&output.stderr).trim());
            warn!(target_name = %target, status = %output.status, "probe exited unsuccessfully");
            return Err(ProbeError::Exit { status: output.status.to_string(), stderr }.into());
        }

        let snapshot = parse_single(&output.stdout, target)?;
        debug!(target_name = %target, ip = %snapshot.ip(), ports = snapshot.ports.len(), "probe finished");
        Ok(snapshot)
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= STDERR_LIMIT {
        return s.to_string();
    }
    let mut end = STDERR_LIMIT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use portwatch_core::{Error, FailureKind};

    fn target() -> ScanTarget {
        ScanTarget::Hostname("localhost".into())
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let prober = NmapProber::new(NmapOptions {
            binary: "/nonexistent/portwatch-nmap".into(),
            ..NmapOptions::default()
        });
        let err = prober.observe(&target()).await.unwrap_err();
        assert!(matches!(err, Error::Probe(ProbeError::Spawn { .. })), "{err}");
        assert_eq!(err.kind(), FailureKind::Unreachable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let prober = NmapProber::new(NmapOptions { binary: "false".into(), ..NmapOptions::default() });
        let err = prober.observe(&target()).await.unwrap_err();
        assert!(matches!(err, Error::Probe(ProbeError::Exit { .. })), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn garbage_output_is_a_parse_error() {
        // `echo` ignores the nmap arguments and exits 0 with non-XML output.
        let prober = NmapProber::new(NmapOptions { binary: "echo".into(), ..NmapOptions::default() });
        let err = prober.observe(&target()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Parse);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(STDERR_LIMIT);
        let t = truncate(&long);
        assert!(t.ends_with("..."));
        assert!(t.len() <= STDERR_LIMIT + 3);
        assert_eq!(truncate("short"), "short");
    }
}
