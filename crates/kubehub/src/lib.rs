//! Drift kubehub: the Kubernetes side of a sync tick.
//!
//! Exports the managed kinds as a multi-document YAML stream and executes
//! planned actions with server-side apply or delete.

#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use drift_core::{SyncAction, SyncOp, DEFAULT_NAMESPACE};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info, instrument, trace, warn};

mod config;

pub use config::{KubeConfig, DEFAULT_FIELD_MANAGER, DEFAULT_KINDS, SYSTEM_NAMESPACES};

/// Served resources, as found by discovery.
#[derive(Debug, Clone, Default)]
pub struct Served(Vec<(ApiResource, bool)>);

impl Served {
    pub async fn discover(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client).run().await.context("running api discovery")?;
        let mut out = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                out.push((ar, matches!(caps.scope, Scope::Namespaced)));
            }
        }
        Ok(Self(out))
    }

    pub fn from_resources(resources: Vec<(ApiResource, bool)>) -> Self {
        Self(resources)
    }

    /// The api resource for `gvk` and whether it is namespaced.
    pub fn find(&self, gvk: &GroupVersionKind) -> Option<(&ApiResource, bool)> {
        self.0
            .iter()
            .find(|(ar, _)| ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind)
            .map(|(ar, namespaced)| (ar, *namespaced))
    }
}

/// Parse "v1/Kind" or "group/v1/Kind".
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Drop server-populated fields so exports stay stable between ticks.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        for field in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid", "selfLink"] {
            meta.remove(field);
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Where an action's document lands in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: String,
}

/// Decode an action's YAML into JSON and find what it targets.
pub fn parse_target(bytes: &[u8]) -> Result<(Json, Target)> {
    let val: serde_yaml::Value = serde_yaml::from_slice(bytes).context("parsing YAML")?;
    let json = serde_json::to_value(val).context("converting YAML to JSON")?;
    let api_version = json.get("apiVersion").and_then(Json::as_str).ok_or_else(|| anyhow!("YAML missing apiVersion"))?;
    let kind = json.get("kind").and_then(Json::as_str).ok_or_else(|| anyhow!("YAML missing kind"))?;
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    let meta = json.get("metadata");
    let name = meta
        .and_then(|m| m.get("name"))
        .and_then(Json::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("YAML missing metadata.name"))?
        .to_string();
    let namespace = meta
        .and_then(|m| m.get("namespace"))
        .and_then(Json::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string();
    let gvk = GroupVersionKind::gvk(group, version, kind);
    Ok((json, Target { gvk, name, namespace }))
}

/// Render listed objects as one multi-document stream.
fn render_export(docs: &[Json]) -> Result<String> {
    let mut out = String::new();
    for doc in docs {
        let yaml = serde_yaml::to_string(doc).context("serializing exported object")?;
        let _ = write!(out, "---\n{}", yaml);
    }
    Ok(out)
}

/// A live cluster reached through the default kube client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    config: KubeConfig,
}

impl KubeCluster {
    pub async fn connect(config: KubeConfig) -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self { client, config })
    }

    pub fn new(client: Client, config: KubeConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &KubeConfig {
        &self.config
    }

    fn api_for(&self, ar: &ApiResource, namespaced: bool, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if namespaced => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn list_kind(&self, ar: &ApiResource, namespaced: bool) -> Result<Vec<Json>> {
        let api = self.api_for(ar, namespaced, self.config.namespace.as_deref());
        let mut lp = ListParams::default();
        if let Some(sel) = &self.config.selector {
            lp = lp.labels(sel);
        }
        let list = tokio::time::timeout(self.config.request_timeout, api.list(&lp))
            .await
            .with_context(|| format!("timed out listing {}", ar.kind))?
            .with_context(|| format!("listing {}", ar.kind))?;
        let mut out = Vec::with_capacity(list.items.len());
        for obj in list.items {
            let mut v = serde_json::to_value(&obj).context("serializing DynamicObject")?;
            // list items come back without type meta
            if let Some(map) = v.as_object_mut() {
                map.insert("apiVersion".into(), Json::String(ar.api_version.clone()));
                map.insert("kind".into(), Json::String(ar.kind.clone()));
            }
            if !self.config.is_managed(&v) {
                trace!(kind = %ar.kind, name = ?v.pointer("/metadata/name"), "not managed; left out of export");
                continue;
            }
            out.push(strip_noisy(v));
        }
        Ok(out)
    }

    async fn execute(&self, served: &Served, action: &SyncAction) -> Result<()> {
        let (json, target) = parse_target(&action.bytes)?;
        let (ar, namespaced) = served
            .find(&target.gvk)
            .ok_or_else(|| anyhow!("GVK not found: {}/{}/{}", target.gvk.group, target.gvk.version, target.gvk.kind))?;
        let api = self.api_for(ar, namespaced, Some(&target.namespace));
        match action.op {
            SyncOp::Apply => {
                let pp = PatchParams::apply(&self.config.field_manager).force();
                let patch = Patch::Apply(&json);
                let call = api.patch(&target.name, &pp, &patch);
                tokio::time::timeout(self.config.request_timeout, call).await.context("timed out applying")?.context("server-side apply")?;
            }
            SyncOp::Delete => {
                let dp = DeleteParams::default();
                let call = api.delete(&target.name, &dp);
                match tokio::time::timeout(self.config.request_timeout, call).await.context("timed out deleting")? {
                    Ok(_) => {}
                    Err(kube::Error::Api(ae)) if ae.code == 404 => debug!(id = %action.id, "already gone"),
                    Err(e) => return Err(e).context("delete"),
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl drift_sync::Cluster for KubeCluster {
    #[instrument(skip_all, fields(kinds = self.config.kinds.len()))]
    async fn export(&self) -> Result<Bytes> {
        let started = Instant::now();
        let served = Served::discover(self.client.clone()).await?;
        let mut docs = Vec::new();
        for key in &self.config.kinds {
            let gvk = parse_gvk_key(key)?;
            let Some((ar, namespaced)) = served.find(&gvk) else {
                warn!(kind = %key, "kind not served by cluster; skipping");
                continue;
            };
            let items = self.list_kind(ar, namespaced).await?;
            debug!(kind = %key, count = items.len(), "listed");
            docs.extend(items);
        }
        let out = render_export(&docs)?;
        histogram!("export_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(objects = docs.len(), bytes = out.len(), "exported cluster state");
        Ok(Bytes::from(out))
    }

    #[instrument(skip_all, fields(actions = actions.len()))]
    async fn sync(&self, actions: &[SyncAction]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let served = Served::discover(self.client.clone()).await?;
        let mut failed = Vec::new();
        for action in actions {
            match self.execute(&served, action).await {
                Ok(()) => {
                    counter!("sync_apply_ok", 1u64);
                    debug!(id = %action.id, op = %action.op, "done");
                }
                Err(e) => {
                    counter!("sync_apply_err", 1u64);
                    warn!(id = %action.id, op = %action.op, error = %format!("{:#}", e), "action failed");
                    failed.push(action.id.to_string());
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} of {} actions failed: {}", failed.len(), actions.len(), failed.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gvk_keys_parse() {
        assert_eq!(parse_gvk_key("v1/ConfigMap").unwrap(), GroupVersionKind::gvk("", "v1", "ConfigMap"));
        assert_eq!(parse_gvk_key("apps/v1/Deployment").unwrap(), GroupVersionKind::gvk("apps", "v1", "Deployment"));
        assert!(parse_gvk_key("Deployment").is_err());
        assert!(parse_gvk_key("a/b/c/d").is_err());
        assert!(parse_gvk_key("v1/").is_err());
    }

    #[test]
    fn strip_noisy_prunes_server_fields() {
        let v = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "uid": "1234",
                "resourceVersion": "42",
                "managedFields": [{}],
                "annotations": {"flux.weave.works/ignore": "true"}
            },
            "data": {"a": "b"},
            "status": {"phase": "x"}
        });
        let out = strip_noisy(v);
        let meta = out["metadata"].as_object().unwrap();
        assert!(!meta.contains_key("uid"));
        assert!(!meta.contains_key("resourceVersion"));
        assert!(!meta.contains_key("managedFields"));
        assert_eq!(meta["annotations"]["flux.weave.works/ignore"], "true");
        assert!(out.get("status").is_none());
        assert_eq!(out["data"]["a"], "b");
    }

    #[test]
    fn target_defaults_namespace() {
        let (json, t) = parse_target(b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n").unwrap();
        assert_eq!(t.gvk, GroupVersionKind::gvk("apps", "v1", "Deployment"));
        assert_eq!(t.name, "web");
        assert_eq!(t.namespace, "default");
        assert_eq!(json["kind"], "Deployment");

        let (_, t) = parse_target(b"apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n  namespace: prod\n").unwrap();
        assert_eq!(t.gvk.group, "");
        assert_eq!(t.namespace, "prod");
    }

    #[test]
    fn target_errors_name_missing_fields() {
        let err = parse_target(b"kind: Service\nmetadata:\n  name: web\n").unwrap_err();
        assert!(err.to_string().contains("apiVersion"));
        let err = parse_target(b"apiVersion: v1\nkind: Service\n").unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn served_lookup_matches_full_gvk() {
        let deploy = GroupVersionKind::gvk("apps", "v1", "Deployment");
        let ns = GroupVersionKind::gvk("", "v1", "Namespace");
        let served = Served::from_resources(vec![(ApiResource::from_gvk(&deploy), true), (ApiResource::from_gvk(&ns), false)]);
        assert!(served.find(&deploy).unwrap().1);
        assert!(!served.find(&ns).unwrap().1);
        assert!(served.find(&GroupVersionKind::gvk("apps", "v1beta1", "Deployment")).is_none());
    }

    #[test]
    fn export_round_trips_through_the_parser() {
        let docs = vec![
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a", "namespace": "prod"}}),
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "prod"}}),
        ];
        let out = render_export(&docs).unwrap();
        let map = drift_manifests::parse_multidoc(out, drift_sync::EXPORTED_SOURCE).unwrap();
        let ids: Vec<String> = map.keys().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["default:Namespace/prod", "prod:ConfigMap/a"]);
    }

    #[test]
    fn empty_export_is_empty_stream() {
        assert_eq!(render_export(&[]).unwrap(), "");
    }
}
