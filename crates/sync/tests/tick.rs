use std::sync::Mutex;

use anyhow::anyhow;
use bytes::Bytes;
use drift_core::{ManifestError, ResourceMap, SyncAction, SyncOp};
use drift_manifests::parse_multidoc;
use drift_sync::{sync, Cluster, SyncError, YamlManifests};

/// In-memory cluster recording what it was asked to do.
struct FakeCluster {
    export: Result<&'static str, &'static str>,
    fail_sync: bool,
    synced: Mutex<Vec<SyncAction>>,
}

impl FakeCluster {
    fn exporting(export: &'static str) -> Self {
        Self { export: Ok(export), fail_sync: false, synced: Mutex::new(Vec::new()) }
    }

    fn recorded(&self) -> Vec<(SyncOp, String)> {
        self.synced.lock().unwrap().iter().map(|a| (a.op, a.id.to_string())).collect()
    }
}

#[async_trait::async_trait]
impl Cluster for FakeCluster {
    async fn export(&self) -> anyhow::Result<Bytes> {
        self.export.map(|s| Bytes::from_static(s.as_bytes())).map_err(|e| anyhow!(e))
    }

    async fn sync(&self, actions: &[SyncAction]) -> anyhow::Result<()> {
        if self.fail_sync {
            return Err(anyhow!("apply rejected by api server"));
        }
        self.synced.lock().unwrap().extend_from_slice(actions);
        Ok(())
    }
}

const REPO: &str = "---
kind: Deployment
metadata:
  name: web
  namespace: prod
---
kind: Service
metadata:
  name: web
  namespace: prod
";

const CLUSTER: &str = "---
kind: Service
metadata:
  name: web
  namespace: prod
---
kind: ConfigMap
metadata:
  name: stale
  namespace: prod
---
kind: Secret
metadata:
  name: frozen
  namespace: prod
  annotations:
    flux.weave.works/ignore: \"true\"
";

fn desired(doc: &'static str) -> ResourceMap {
    parse_multidoc(doc, "repo").unwrap()
}

#[tokio::test]
async fn tick_applies_repo_and_deletes_strays() {
    let cluster = FakeCluster::exporting(CLUSTER);
    let report = sync(&YamlManifests, &desired(REPO), &cluster, true).await.unwrap();

    assert_eq!(report.actual, 3);
    assert_eq!(report.summary.applies, 2);
    assert_eq!(report.summary.deletes, 1);
    assert_eq!(
        cluster.recorded(),
        vec![
            (SyncOp::Delete, "prod:ConfigMap/stale".to_string()),
            (SyncOp::Apply, "prod:Deployment/web".to_string()),
            (SyncOp::Apply, "prod:Service/web".to_string()),
        ]
    );
}

#[tokio::test]
async fn tick_without_deletes_only_applies() {
    let cluster = FakeCluster::exporting(CLUSTER);
    sync(&YamlManifests, &desired(REPO), &cluster, false).await.unwrap();
    assert!(cluster.recorded().iter().all(|(op, _)| *op == SyncOp::Apply));
}

#[tokio::test]
async fn empty_export_never_deletes() {
    let cluster = FakeCluster::exporting("");
    let report = sync(&YamlManifests, &desired(REPO), &cluster, true).await.unwrap();
    assert_eq!(report.summary.deletes, 0);
    assert_eq!(report.summary.applies, 2);
}

#[tokio::test]
async fn export_failure_is_wrapped() {
    let cluster = FakeCluster { export: Err("connection refused"), fail_sync: false, synced: Mutex::new(Vec::new()) };
    let err = sync(&YamlManifests, &desired(REPO), &cluster, true).await.unwrap_err();
    assert!(matches!(err, SyncError::Export(_)));
    assert_eq!(err.to_string(), "exporting resource defs from cluster");
    assert!(cluster.recorded().is_empty());
}

#[tokio::test]
async fn unparseable_export_fails_closed() {
    let cluster = FakeCluster::exporting("kind: Service\nmetadata: [\n");
    let err = sync(&YamlManifests, &desired(REPO), &cluster, true).await.unwrap_err();
    assert!(matches!(err, SyncError::ParseExport(ManifestError::Malformed { .. })));
    assert!(cluster.recorded().is_empty());
}

#[tokio::test]
async fn execution_failure_is_wrapped() {
    let cluster = FakeCluster { export: Ok(CLUSTER), fail_sync: true, synced: Mutex::new(Vec::new()) };
    let err = sync(&YamlManifests, &desired(REPO), &cluster, true).await.unwrap_err();
    assert!(matches!(err, SyncError::Execute(_)));
    let cause = std::error::Error::source(&err).map(|e| e.to_string()).unwrap_or_default();
    assert!(cause.contains("apply rejected"), "cause={}", cause);
}

#[tokio::test]
async fn invalid_helm_release_is_skipped_but_not_deleted() {
    let repo = "---
kind: FluxHelmResource
metadata:
  name: redis
  namespace: prod
spec:
  chartgitpath: charts/redis
  customizations:
  - name: image
    value: \"\"
---
kind: Service
metadata:
  name: web
  namespace: prod
";
    let live = "---
kind: FluxHelmResource
metadata:
  name: redis
  namespace: prod
spec:
  chartgitpath: charts/redis
";
    let cluster = FakeCluster::exporting(live);
    let report = sync(&YamlManifests, &desired(repo), &cluster, true).await.unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id.to_string(), "prod:FluxHelmResource/redis");
    assert_eq!(cluster.recorded(), vec![(SyncOp::Apply, "prod:Service/web".to_string())]);
}
