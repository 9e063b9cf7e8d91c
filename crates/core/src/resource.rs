//! The resource model: one variant per specially understood kind plus a generic catch-all.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use smallvec::SmallVec;

use crate::de;
use crate::image::{Container, ImageRef};
use crate::policy::PolicySet;
use crate::ResourceId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Metadata {
    #[serde(default, deserialize_with = "de::scalar")]
    pub name: String,
    #[serde(default, deserialize_with = "de::scalar")]
    pub namespace: String,
    #[serde(default, deserialize_with = "de::scalar_map")]
    pub annotations: BTreeMap<String, String>,
}

/// The minimal shape every document must have.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    #[serde(default, deserialize_with = "de::scalar")]
    pub kind: String,
    #[serde(default, deserialize_with = "de::nullable")]
    pub metadata: Metadata,
}

/// Fields shared by every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    source: Arc<str>,
    bytes: Bytes,
    kind: String,
    metadata: Metadata,
}

impl Object {
    pub fn new(source: Arc<str>, bytes: Bytes, header: Header) -> Self {
        Self { source, bytes, kind: header.kind, metadata: header.metadata }
    }

    pub fn id(&self) -> ResourceId { ResourceId::new(self.metadata.namespace.as_str(), self.kind.as_str(), self.metadata.name.as_str()) }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn metadata(&self) -> &Metadata { &self.metadata }
    pub fn source(&self) -> &str { &self.source }
    pub fn bytes(&self) -> &Bytes { &self.bytes }
}

/// Pod controllers: the object plus its normalized containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub object: Object,
    pub containers: SmallVec<[Container; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChartParam {
    #[serde(default, deserialize_with = "de::scalar")]
    pub name: String,
    #[serde(default, deserialize_with = "de::scalar")]
    pub value: String,
    #[serde(rename = "type", default, deserialize_with = "de::scalar")]
    pub kind: String,
}

/// A Helm chart release declared as a `FluxHelmResource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmRelease {
    pub object: Object,
    pub chart_git_path: String,
    pub chart_update: bool,
    pub customizations: Vec<ChartParam>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Deployment(Workload),
    DaemonSet(Workload),
    StatefulSet(Workload),
    CronJob(Workload),
    Namespace(Object),
    HelmRelease(HelmRelease),
    Generic(Object),
}

/// A resource that parsed but cannot be acted upon as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub id: ResourceId,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}: {}", self.id, self.reason) }
}

impl Resource {
    /// Build a resource from one decoded document.
    ///
    /// `bytes` is the raw form carried into sync actions. Returns `Ok(None)`
    /// when the document declares no kind (for example a comment-only document).
    /// A kind without `metadata.name` has no usable identity and is an error.
    pub fn from_value(source: &Arc<str>, bytes: Bytes, value: Value) -> Result<Option<Self>, serde_yaml::Error> {
        let header: Header = serde_yaml::from_value(value.clone())?;
        if header.kind.is_empty() {
            return Ok(None);
        }
        if header.metadata.name.is_empty() {
            return Err(serde_yaml::Error::custom(format!("{} is missing metadata.name", header.kind)));
        }
        let object = Object::new(Arc::clone(source), bytes, header);
        let res = match object.kind() {
            "Deployment" => Resource::Deployment(workload(object, value)?),
            "DaemonSet" => Resource::DaemonSet(workload(object, value)?),
            "StatefulSet" => Resource::StatefulSet(workload(object, value)?),
            "CronJob" => Resource::CronJob(workload(object, value)?),
            "Namespace" => Resource::Namespace(object),
            "FluxHelmResource" => {
                let shape: HelmShape = serde_yaml::from_value(value)?;
                Resource::HelmRelease(HelmRelease {
                    object,
                    chart_git_path: shape.spec.chart_git_path,
                    chart_update: shape.spec.chart_update,
                    // unnamed params are discarded
                    customizations: shape.spec.customizations.into_iter().filter(|p| !p.name.is_empty()).collect(),
                })
            }
            _ => Resource::Generic(object),
        };
        Ok(Some(res))
    }

    pub fn object(&self) -> &Object {
        match self {
            Resource::Deployment(w) | Resource::DaemonSet(w) | Resource::StatefulSet(w) | Resource::CronJob(w) => &w.object,
            Resource::HelmRelease(h) => &h.object,
            Resource::Namespace(o) | Resource::Generic(o) => o,
        }
    }

    pub fn id(&self) -> ResourceId { self.object().id() }
    pub fn kind(&self) -> &str { self.object().kind() }
    pub fn name(&self) -> &str { &self.object().metadata().name }
    pub fn source(&self) -> &str { self.object().source() }
    pub fn bytes(&self) -> &Bytes { self.object().bytes() }
    pub fn annotations(&self) -> &BTreeMap<String, String> { &self.object().metadata().annotations }

    /// Policies declared in annotations, derived on each call.
    pub fn policies(&self) -> PolicySet { PolicySet::from_annotations(self.annotations()) }

    /// Containers of pod controllers; empty for everything else.
    pub fn containers(&self) -> &[Container] {
        match self {
            Resource::Deployment(w) | Resource::DaemonSet(w) | Resource::StatefulSet(w) | Resource::CronJob(w) => &w.containers,
            _ => &[],
        }
    }

    /// Problems that make this resource unusable for the current tick.
    pub fn validate(&self) -> Vec<Violation> {
        match self {
            Resource::HelmRelease(h) => h
                .customizations
                .iter()
                .filter(|p| p.value.is_empty())
                .map(|p| Violation { id: self.id(), reason: format!("customization value must be specified [{}]", p.name) })
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn workload(object: Object, value: Value) -> Result<Workload, serde_yaml::Error> {
    let shape: ControllerShape = serde_yaml::from_value(value)?;
    let spec = shape.spec;
    // CronJobs wrap their pod template in a job template
    let raw = if spec.template.spec.containers.is_empty() {
        spec.job_template.spec.template.spec.containers
    } else {
        spec.template.spec.containers
    };
    let containers = raw.into_iter().map(|c| Container { name: c.name, image: ImageRef::parse(&c.image) }).collect();
    Ok(Workload { object, containers })
}

#[derive(Debug, Default, Deserialize)]
struct ControllerShape {
    #[serde(default, deserialize_with = "de::nullable")]
    spec: ControllerSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ControllerSpec {
    #[serde(default, deserialize_with = "de::nullable")]
    template: PodTemplate,
    #[serde(rename = "jobTemplate", default, deserialize_with = "de::nullable")]
    job_template: JobTemplate,
}

#[derive(Debug, Default, Deserialize)]
struct JobTemplate {
    #[serde(default, deserialize_with = "de::nullable")]
    spec: JobSpec,
}

#[derive(Debug, Default, Deserialize)]
struct JobSpec {
    #[serde(default, deserialize_with = "de::nullable")]
    template: PodTemplate,
}

#[derive(Debug, Default, Deserialize)]
struct PodTemplate {
    #[serde(default, deserialize_with = "de::nullable")]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default, deserialize_with = "de::nullable")]
    containers: Vec<ContainerShape>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerShape {
    #[serde(default, deserialize_with = "de::scalar")]
    name: String,
    #[serde(default, deserialize_with = "de::scalar")]
    image: String,
}

#[derive(Debug, Default, Deserialize)]
struct HelmShape {
    #[serde(default, deserialize_with = "de::nullable")]
    spec: HelmSpec,
}

#[derive(Debug, Default, Deserialize)]
struct HelmSpec {
    #[serde(rename = "chartgitpath", default, deserialize_with = "de::scalar")]
    chart_git_path: String,
    #[serde(rename = "chartupdate", default, deserialize_with = "de::nullable")]
    chart_update: bool,
    #[serde(default, deserialize_with = "de::nullable")]
    customizations: Vec<ChartParam>,
}
