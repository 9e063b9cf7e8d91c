//! Drift sync: plan and run one reconciliation tick against a cluster.
//!
//! The planner is a pure function over two resource maps; everything that
//! touches the outside world goes through the [`Cluster`] and [`Manifests`]
//! traits so the whole tick can be exercised without a live cluster.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use bytes::Bytes;
use drift_core::{ManifestError, Resource, ResourceId, ResourceMap, SyncAction, SyncOp, Violation};
use metrics::{counter, histogram};
use tracing::{info, instrument, warn};

pub mod plan;
pub mod retry;

pub use plan::{plan, PlanSummary};
pub use retry::{retry_with_backoff, RetryConfig};

/// Source label given to resources parsed from a cluster export.
pub const EXPORTED_SOURCE: &str = "exported";

/// The live system being reconciled.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// Serialized snapshot of the managed resources, as a multi-document YAML stream.
    async fn export(&self) -> anyhow::Result<Bytes>;

    /// Apply or delete each listed resource.
    async fn sync(&self, actions: &[SyncAction]) -> anyhow::Result<()>;
}

pub trait Manifests: Send + Sync {
    fn load_manifests(&self, paths: &[PathBuf]) -> Result<ResourceMap, ManifestError>;
    fn parse_manifests(&self, bytes: Bytes) -> Result<ResourceMap, ManifestError>;
}

/// YAML manifests on disk and YAML cluster exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlManifests;

impl Manifests for YamlManifests {
    fn load_manifests(&self, paths: &[PathBuf]) -> Result<ResourceMap, ManifestError> {
        drift_manifests::load(paths)
    }

    fn parse_manifests(&self, bytes: Bytes) -> Result<ResourceMap, ManifestError> {
        drift_manifests::parse_multidoc(bytes, EXPORTED_SOURCE)
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("exporting resource defs from cluster")]
    Export(#[source] anyhow::Error),
    #[error("parsing exported resources")]
    ParseExport(#[source] ManifestError),
    #[error("applying sync actions to cluster")]
    Execute(#[source] anyhow::Error),
}

/// What a completed tick did.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncReport {
    /// Resources found in the cluster export
    pub actual: usize,
    pub summary: PlanSummary,
    /// Resources left out of this tick because they cannot be applied as written
    pub skipped: Vec<Violation>,
}

/// Plan a tick, leaving out applies of desired resources that fail validation.
///
/// The violating resources still count as desired, so they are never deleted
/// because of the violation.
pub fn prepare(desired: &ResourceMap, actual: &ResourceMap, allow_deletes: bool) -> (Vec<SyncAction>, Vec<Violation>) {
    let skipped: Vec<Violation> = desired.values().flat_map(Resource::validate).collect();
    let skipped_ids: BTreeSet<&ResourceId> = skipped.iter().map(|v| &v.id).collect();
    for v in &skipped {
        warn!(id = %v.id, reason = %v.reason, "skipping resource for this tick");
    }

    let mut actions = plan(desired, actual, allow_deletes);
    actions.retain(|a| !(a.op == SyncOp::Apply && skipped_ids.contains(&a.id)));
    (actions, skipped)
}

/// Run one tick: export the cluster, plan against `desired`, execute the plan.
///
/// Returns the first failure, wrapped with the stage it happened in.
#[instrument(skip_all, fields(desired = desired.len(), allow_deletes = allow_deletes))]
pub async fn sync<M, C>(manifests: &M, desired: &ResourceMap, cluster: &C, allow_deletes: bool) -> Result<SyncReport, SyncError>
where
    M: Manifests + ?Sized,
    C: Cluster + ?Sized,
{
    let started = Instant::now();
    let exported = cluster.export().await.map_err(SyncError::Export)?;
    let actual = manifests.parse_manifests(exported).map_err(SyncError::ParseExport)?;

    let (actions, skipped) = prepare(desired, &actual, allow_deletes);
    let summary = PlanSummary::of(&actions);

    counter!("sync_actions_total", actions.len() as u64);
    cluster.sync(&actions).await.map_err(SyncError::Execute)?;

    histogram!("sync_tick_ms", started.elapsed().as_secs_f64() * 1000.0);
    info!(actual = actual.len(), applies = summary.applies, deletes = summary.deletes, skipped = skipped.len(), "sync tick complete");
    Ok(SyncReport { actual: actual.len(), summary, skipped })
}
