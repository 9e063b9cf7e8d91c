//! Drift core types: resource identities, the resource model, policies and sync actions.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod de;
pub mod error;
pub mod image;
pub mod policy;
pub mod resource;

pub use error::{ManifestError, ParseIdError};
pub use image::{Container, ImageRef};
pub use policy::{Policy, PolicySet, POLICY_PREFIX};
pub use resource::{ChartParam, Header, HelmRelease, Metadata, Object, Resource, Violation, Workload};

/// Namespace substituted when a document does not declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Resources keyed by identity. Ordered so that anything derived from it is deterministic.
pub type ResourceMap = BTreeMap<ResourceId, Resource>;

/// Stable identity of a resource: `(namespace, kind, name)`.
///
/// The namespace is never empty; an unspecified namespace is normalized to
/// [`DEFAULT_NAMESPACE`] at construction time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    namespace: String,
    kind: String,
    name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        let mut namespace = namespace.into();
        if namespace.is_empty() {
            namespace = DEFAULT_NAMESPACE.to_string();
        }
        Self { namespace, kind: kind.into(), name: name.into() }
    }

    pub fn namespace(&self) -> &str { &self.namespace }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn name(&self) -> &str { &self.name }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = ParseIdError;

    /// Parses the `namespace:kind/name` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = s.split_once(':').ok_or_else(|| ParseIdError(s.to_string()))?;
        let (kind, name) = rest.split_once('/').ok_or_else(|| ParseIdError(s.to_string()))?;
        if namespace.is_empty() || kind.is_empty() || name.is_empty() {
            return Err(ParseIdError(s.to_string()));
        }
        Ok(Self::new(namespace, kind, name))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ParseIdError;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self { id.to_string() }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Apply,
    Delete,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOp::Apply => f.write_str("apply"),
            SyncOp::Delete => f.write_str("delete"),
        }
    }
}

/// One instruction for the executor: apply or delete the resource carried in `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAction {
    pub id: ResourceId,
    pub op: SyncOp,
    /// Raw document exactly as it appeared in its source
    pub bytes: Bytes,
}

impl SyncAction {
    pub fn apply(res: &Resource) -> Self {
        Self { id: res.id(), op: SyncOp::Apply, bytes: res.bytes().clone() }
    }

    pub fn delete(res: &Resource) -> Self {
        Self { id: res.id(), op: SyncOp::Delete, bytes: res.bytes().clone() }
    }
}

pub mod prelude {
    pub use super::{
        Container, ImageRef, ManifestError, Policy, PolicySet, Resource, ResourceId, ResourceMap, SyncAction, SyncOp,
    };
}
