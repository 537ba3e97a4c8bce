use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use history_sqlite::SqliteHistory;
use probe::NmapProber;
use reconcile::{Outcome, ReconciliationResult, Reconciler};
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;

use config::{Config, Overrides};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Debug, Parser)]
#[command(name = "portwatch", version, about = "Port state reconciliation and history")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./portwatch.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    /// SQLite database file
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,
    /// Path or name of the nmap binary
    #[arg(long, global = true)]
    nmap: Option<String>,
    /// Ports: comma/range list (e.g., 22,80,443 or 0-1000)
    #[arg(long, global = true)]
    ports: Option<String>,
    /// Targets reconciled concurrently
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Per-target probe timeout in seconds
    #[arg(long, global = true)]
    probe_timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Run the HTTP API (POST /scan, GET /health)
    Serve {
        /// Listen address, e.g. 127.0.0.1:8080
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Reconcile targets once and print the outcome
    Scan {
        /// Target hosts or IPs
        #[arg(value_name = "TARGET", conflicts_with = "targets")]
        target_args: Vec<String>,
        /// File with newline-delimited targets (comments with # and blanks ignored)
        #[arg(long, value_name = "FILE")]
        targets: Option<PathBuf>,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Write the change list as CSV instead of text/json when --out is provided
        #[arg(long, default_value_t = false, requires = "out")]
        csv: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Commands::Version = cli.command {
        println!("portwatch {} (core {})", env!("CARGO_PKG_VERSION"), portwatch_core::version());
        return Ok(());
    }

    let file = config::load_config(cli.config.as_deref())?;
    let listen = match &cli.command {
        Commands::Serve { listen } => *listen,
        _ => None,
    };
    let overrides = Overrides {
        listen,
        database: cli.database.clone(),
        nmap: cli.nmap.clone(),
        ports: cli.ports.clone(),
        workers: cli.workers,
        probe_timeout_secs: cli.probe_timeout_secs,
    };
    let cfg = Config::resolve(file, &overrides)?;
    init_tracing(&cfg.log_level, cli.log_json);

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Version => Ok(()),
        Commands::Serve { .. } => rt.block_on(serve(cfg)),
        Commands::Scan { target_args, targets, format, out, csv } => {
            let targets = match targets {
                Some(path) => {
                    let s = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
                    reconcile::parse_target_list(&s)?
                }
                None if target_args.is_empty() => return Err(anyhow!("provide a target or --targets <file>")),
                None => reconcile::parse_targets(&target_args)?,
            };
            let result = rt.block_on(scan_once(&cfg, targets))?;
            write_result(&result, format, out, csv)
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

fn build_reconciler(cfg: &Config) -> Result<Reconciler> {
    let store = SqliteHistory::open_or_create(&cfg.database_path, cfg.busy_timeout)?;
    info!(db = %store.path().display(), nmap = %cfg.probe.binary, ports = %cfg.probe.ports, "store opened");
    let prober = NmapProber::new(cfg.probe.clone());
    Ok(Reconciler::new(Arc::new(store), Arc::new(prober), cfg.reconcile.clone()))
}

/// Cancels the returned token on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; shutting down");
            t.cancel();
        }
    });
    token
}

async fn serve(cfg: Config) -> Result<()> {
    let reconciler = build_reconciler(&cfg)?;
    let shutdown = ctrl_c_token();
    let app = api::router(api::AppState { reconciler, shutdown: shutdown.clone() });
    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("bind {}", cfg.listen))?;
    info!(addr = %cfg.listen, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("server stopped");
    Ok(())
}

async fn scan_once(cfg: &Config, targets: Vec<portwatch_core::ScanTarget>) -> Result<ReconciliationResult> {
    let reconciler = build_reconciler(cfg)?;
    Ok(reconciler.reconcile(targets, ctrl_c_token()).await?)
}

fn write_result(result: &ReconciliationResult, format: OutputFormat, out: Option<PathBuf>, csv: bool) -> Result<()> {
    if let (true, Some(path)) = (csv, out.as_ref()) {
        let mut wtr = csv::Writer::from_writer(std::fs::File::create(path)?);
        write_changes_csv(&mut wtr, result)?;
        wtr.flush()?;
        return Ok(());
    }
    let mut w: Box<dyn Write> = match out {
        Some(path) => Box::new(BufWriter::new(std::fs::File::create(&path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut w, &api::ScanResponse::new(result))?;
            writeln!(w)?;
        }
        OutputFormat::Jsonl => {
            for t in &result.targets {
                let line = serde_json::json!({ "run_id": result.run_id, "outcome": t });
                writeln!(w, "{}", serde_json::to_string(&line)?)?;
            }
        }
        OutputFormat::Text => write_text(&mut w, result)?,
    }
    w.flush()?;
    Ok(())
}

fn write_text(w: &mut dyn Write, result: &ReconciliationResult) -> Result<()> {
    writeln!(w, "run {}", result.run_id)?;
    for t in &result.targets {
        match &t.outcome {
            Outcome::Reported(r) => {
                let seen = if r.first_seen { " (first seen)" } else { "" };
                writeln!(w, "{} [{}]{}: {} ports", t.target, r.snapshot.ip(), seen, r.snapshot.ports.len())?;
                for (port, status) in &r.snapshot.ports {
                    let change = r.changes.get(*port).map(|c| format!(" ({c})")).unwrap_or_default();
                    writeln!(w, "  {port}/tcp {status}{change}")?;
                }
                for rec in r.changes.records().filter(|c| !r.snapshot.ports.contains_key(&c.port)) {
                    writeln!(w, "  {}/tcp gone ({})", rec.port, rec.kind)?;
                }
            }
            Outcome::Failed(f) => writeln!(w, "{}: failed: {}", t.target, f.message)?,
        }
    }
    Ok(())
}

fn write_changes_csv<W: Write>(wtr: &mut csv::Writer<W>, result: &ReconciliationResult) -> Result<()> {
    wtr.write_record(["run_id", "target", "ip", "port", "change", "status", "observed_at"])?;
    let run_id = result.run_id.to_string();
    for t in &result.targets {
        let Outcome::Reported(r) = &t.outcome else { continue };
        let at = r.snapshot.observed_at.format(&Rfc3339).unwrap_or_default();
        let (target, ip) = (t.target.to_string(), r.snapshot.ip().to_string());
        for rec in r.changes.records() {
            let port = rec.port.to_string();
            let status = r.snapshot.ports.get(&rec.port).map(|s| s.as_str()).unwrap_or_default();
            wtr.write_record([run_id.as_str(), &target, &ip, &port, rec.kind.as_str(), status, &at])?;
        }
    }
    Ok(())
}
