use std::time::Duration;

use serde_json::Value as Json;

/// Kinds exported when `DRIFT_KINDS` is not set.
pub const DEFAULT_KINDS: [&str; 6] = [
    "apps/v1/Deployment",
    "apps/v1/DaemonSet",
    "apps/v1/StatefulSet",
    "batch/v1/CronJob",
    "v1/Service",
    "v1/ConfigMap",
];

pub const DEFAULT_FIELD_MANAGER: &str = "drift";

/// Namespaces owned by the control plane; never exported unless configured otherwise.
pub const SYSTEM_NAMESPACES: [&str; 3] = ["kube-system", "kube-public", "kube-node-lease"];

/// Labels marking objects maintained by cluster addons.
const ADDON_LABELS: [&str; 2] = ["addonmanager.kubernetes.io/mode", "kubernetes.io/cluster-service"];

/// Objects the control plane creates in ordinary namespaces: (kind, namespace or `*`, name).
const BUILTIN_OBJECTS: [(&str, &str, &str); 2] = [("ConfigMap", "*", "kube-root-ca.crt"), ("Service", "default", "kubernetes")];

/// Settings for talking to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeConfig {
    /// GVK keys to export, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
    pub kinds: Vec<String>,
    /// Label selector restricting what counts as managed
    pub selector: Option<String>,
    /// Restrict namespaced kinds to one namespace
    pub namespace: Option<String>,
    /// Namespaces whose objects are never exported
    pub excluded_namespaces: Vec<String>,
    pub request_timeout: Duration,
    pub field_manager: String,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            kinds: DEFAULT_KINDS.iter().map(|s| s.to_string()).collect(),
            selector: None,
            namespace: None,
            excluded_namespaces: SYSTEM_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            request_timeout: Duration::from_secs(30),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl KubeConfig {
    /// Read `DRIFT_KINDS`, `DRIFT_SELECTOR`, `DRIFT_NAMESPACE`,
    /// `DRIFT_EXCLUDE_NAMESPACES`, `DRIFT_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(kinds) = get("DRIFT_KINDS") {
            let kinds = split_list(&kinds);
            if !kinds.is_empty() {
                cfg.kinds = kinds;
            }
        }
        // an explicitly empty value exports system namespaces too
        if let Some(excluded) = get("DRIFT_EXCLUDE_NAMESPACES") {
            cfg.excluded_namespaces = split_list(&excluded);
        }
        cfg.selector = get("DRIFT_SELECTOR").filter(|s| !s.is_empty());
        cfg.namespace = get("DRIFT_NAMESPACE").filter(|s| !s.is_empty());
        if let Some(secs) = get("DRIFT_REQUEST_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            cfg.request_timeout = Duration::from_secs(secs.max(1));
        }
        cfg
    }

    /// Whether a listed object belongs to the set drift reconciles.
    ///
    /// System namespaces, addon-managed objects, objects owned by a controller
    /// and the few objects the control plane creates on its own are left out.
    pub fn is_managed(&self, obj: &Json) -> bool {
        let meta = obj.get("metadata");
        let field = |k: &str| meta.and_then(|m| m.get(k)).and_then(Json::as_str).unwrap_or("");
        let (name, namespace) = (field("name"), field("namespace"));
        let kind = obj.get("kind").and_then(Json::as_str).unwrap_or("");

        if self.excluded_namespaces.iter().any(|ns| ns == namespace) {
            return false;
        }
        if let Some(labels) = meta.and_then(|m| m.get("labels")).and_then(Json::as_object) {
            if ADDON_LABELS.iter().any(|l| labels.contains_key(*l)) {
                return false;
            }
        }
        let owned = meta
            .and_then(|m| m.get("ownerReferences"))
            .and_then(Json::as_array)
            .is_some_and(|refs| refs.iter().any(|r| r.get("controller").and_then(Json::as_bool) == Some(true)));
        if owned {
            return false;
        }
        !BUILTIN_OBJECTS.iter().any(|(k, ns, n)| *k == kind && *n == name && (*ns == "*" || *ns == namespace))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}
