use anyhow::{anyhow, Context, Result};
use probe::NmapOptions;
use reconcile::ReconcileOptions;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PATH: &str = "portwatch.yaml";

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    pub binary: Option<String>,
    pub ports: Option<String>,
    pub timing: Option<u8>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    pub workers: Option<usize>,
}

/// Contents of `portwatch.yaml`. Every field is optional.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub server: Option<ServerConfig>,
    pub database: Option<DatabaseConfig>,
    pub probe: Option<ProbeConfig>,
    pub reconcile: Option<ReconcileConfig>,
    pub log_level: Option<String>,
}

/// Values given on the command line; these win over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<SocketAddr>,
    pub database: Option<PathBuf>,
    pub nmap: Option<String>,
    pub ports: Option<String>,
    pub workers: Option<usize>,
    pub probe_timeout_secs: Option<u64>,
}

/// Fully resolved settings, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
    pub probe: NmapOptions,
    pub reconcile: ReconcileOptions,
    pub log_level: String,
}

/// Load the YAML file. With no explicit path, `./portwatch.yaml` is used if
/// present and defaults apply otherwise.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_PATH);
            if p.exists() { p.to_path_buf() } else { return Ok(FileConfig::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("read config {}", path.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parse config {}", path.display()))
}

impl Config {
    pub fn resolve(file: FileConfig, cli: &Overrides) -> Result<Config> {
        let server = file.server.unwrap_or_default();
        let db = file.database.unwrap_or_default();
        let pr = file.probe.unwrap_or_default();
        let rc = file.reconcile.unwrap_or_default();
        let defaults = NmapOptions::default();

        let ports = cli.ports.clone().or(pr.ports).unwrap_or(defaults.ports);
        probe::parse_ports(&ports).with_context(|| format!("invalid probe ports {ports:?}"))?;
        let timing = pr.timing.unwrap_or(defaults.timing);
        if timing > 5 {
            return Err(anyhow!("probe timing must be 0..=5, got {timing}"));
        }
        let workers = cli.workers.or(rc.workers).unwrap_or_else(|| ReconcileOptions::default().workers);
        if workers == 0 {
            return Err(anyhow!("reconcile workers must be at least 1"));
        }
        let timeout_secs = cli
            .probe_timeout_secs
            .or(pr.timeout_secs)
            .unwrap_or_else(|| ReconcileOptions::default().probe_timeout.as_secs());

        Ok(Config {
            listen: cli.listen.or(server.listen).unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080))),
            database_path: cli.database.clone().or(db.path).unwrap_or_else(|| PathBuf::from("portwatch.db")),
            busy_timeout: Duration::from_millis(db.busy_timeout_ms.unwrap_or(5_000)),
            probe: NmapOptions {
                binary: cli.nmap.clone().or(pr.binary).unwrap_or(defaults.binary),
                ports,
                timing,
            },
            reconcile: ReconcileOptions { workers, probe_timeout: Duration::from_secs(timeout_secs) },
            log_level: file.log_level.unwrap_or_else(|| "info".into()),
        })
    }
}
