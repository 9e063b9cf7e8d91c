use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use drift_core::{ResourceId, ResourceMap, SyncAction, SyncOp, Violation};
use drift_kubehub::{KubeCluster, KubeConfig};
use drift_sync::{prepare, retry_with_backoff, sync, Cluster, Manifests, PlanSummary, RetryConfig, SyncReport, YamlManifests};
use metrics::counter;
use serde::Serialize;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "driftctl", version, about = "Keep a cluster in sync with a directory of manifests")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load manifests and list what they define
    Parse {
        /// Files or directories to load
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Plan offline against an exported cluster stream
    Plan {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Multi-document YAML export of the cluster
        #[arg(long = "actual")]
        actual: PathBuf,
        #[arg(long = "allow-deletes", env = "DRIFT_ALLOW_DELETES", action = ArgAction::SetTrue)]
        allow_deletes: bool,
    },
    /// Print the live cluster export
    Export,
    /// Reconcile the live cluster with the manifests
    Sync {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long = "allow-deletes", env = "DRIFT_ALLOW_DELETES", action = ArgAction::SetTrue)]
        allow_deletes: bool,
        /// Run a tick every N seconds until interrupted
        #[arg(long = "interval")]
        interval: Option<u64>,
        /// Attempts per tick (0 = retry forever)
        #[arg(long = "max-attempts", default_value_t = 3)]
        max_attempts: u32,
    },
}

fn init_tracing() {
    let env = std::env::var("DRIFT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DRIFT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DRIFT_METRICS_ADDR; expected host:port");
        }
    }
}

/// One row of `driftctl parse`.
#[derive(Debug, Serialize)]
struct Described {
    id: ResourceId,
    source: String,
    policies: Vec<String>,
    images: Vec<String>,
}

fn describe(map: &ResourceMap) -> Vec<Described> {
    map.iter()
        .map(|(id, res)| Described {
            id: id.clone(),
            source: res.source().to_string(),
            policies: res.policies().iter().map(|(p, v)| format!("{}={}", p.as_str(), v)).collect(),
            images: res.containers().iter().map(|c| c.image.to_string()).collect(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct PlannedAction {
    op: SyncOp,
    id: ResourceId,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    actions: Vec<PlannedAction>,
    summary: PlanSummary,
    skipped: Vec<Violation>,
}

fn plan_offline(desired: &ResourceMap, actual_path: &Path, allow_deletes: bool) -> Result<PlanOutput> {
    let raw = std::fs::read(actual_path).with_context(|| format!("reading {}", actual_path.display()))?;
    let actual = YamlManifests.parse_manifests(Bytes::from(raw)).context("parsing cluster export")?;
    let (actions, skipped) = prepare(desired, &actual, allow_deletes);
    let summary = PlanSummary::of(&actions);
    Ok(PlanOutput { actions: actions.iter().map(planned).collect(), summary, skipped })
}

fn planned(a: &SyncAction) -> PlannedAction {
    PlannedAction { op: a.op, id: a.id.clone() }
}

async fn tick(paths: &[PathBuf], cluster: &KubeCluster, allow_deletes: bool) -> Result<SyncReport> {
    // Reload every tick so repo edits are picked up
    let desired = YamlManifests.load_manifests(paths)?;
    Ok(sync(&YamlManifests, &desired, cluster, allow_deletes).await?)
}

fn print_report(output: Output, report: &SyncReport) -> Result<()> {
    match output {
        Output::Human => {
            println!("actual {} • applied {} • deleted {} • skipped {}", report.actual, report.summary.applies, report.summary.deletes, report.skipped.len());
            for v in &report.skipped {
                println!("  skipped {}", v);
            }
        }
        Output::Json => println!("{}", serde_json::to_string(report)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { paths } => {
            info!(paths = paths.len(), "parse invoked");
            let map = YamlManifests.load_manifests(&paths)?;
            let rows = describe(&map);
            match cli.output {
                Output::Human => {
                    println!("{:<48} {:<28} {}", "ID", "POLICIES", "IMAGES");
                    for r in &rows {
                        let policies = if r.policies.is_empty() { "-".to_string() } else { r.policies.join(",") };
                        let images = if r.images.is_empty() { "-".to_string() } else { r.images.join(",") };
                        println!("{:<48} {:<28} {}", r.id.to_string(), policies, images);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Commands::Plan { paths, actual, allow_deletes } => {
            info!(paths = paths.len(), actual = %actual.display(), allow_deletes, "plan invoked");
            let desired = YamlManifests.load_manifests(&paths)?;
            let out = plan_offline(&desired, &actual, allow_deletes)?;
            match cli.output {
                Output::Human => {
                    for a in &out.actions {
                        let sign = match a.op { SyncOp::Apply => '~', SyncOp::Delete => '-' };
                        println!("{} {}", sign, a.id);
                    }
                    for v in &out.skipped {
                        println!("! {}", v);
                    }
                    println!("apply {} • delete {} • skipped {}", out.summary.applies, out.summary.deletes, out.skipped.len());
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&out)?),
            }
        }
        Commands::Export => {
            let cluster = KubeCluster::connect(KubeConfig::from_env()).await?;
            let bytes = cluster.export().await?;
            print!("{}", String::from_utf8_lossy(&bytes));
        }
        Commands::Sync { paths, allow_deletes, interval, max_attempts } => {
            let config = KubeConfig::from_env();
            info!(paths = paths.len(), allow_deletes, interval = ?interval, kinds = ?config.kinds, "sync invoked");
            let cluster = KubeCluster::connect(config).await?;
            let retry = RetryConfig::with_max_attempts(max_attempts);

            let Some(every) = interval else {
                let report = retry_with_backoff(&retry, "sync tick", || tick(&paths, &cluster, allow_deletes)).await?;
                return print_report(cli.output, &report);
            };

            let every = Duration::from_secs(every.max(1));
            loop {
                match retry_with_backoff(&retry, "sync tick", || tick(&paths, &cluster, allow_deletes)).await {
                    Ok(report) => print_report(cli.output, &report)?,
                    Err(e) => {
                        counter!("sync_tick_err", 1u64);
                        error!(error = %format!("{:#}", e), "sync tick failed; waiting for next interval");
                    }
                }
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("interrupted; stopping");
                        break;
                    }
                    _ = tokio::time::sleep(every) => {}
                }
            }
        }
    }
    Ok(())
}
