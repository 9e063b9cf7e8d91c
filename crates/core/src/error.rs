use std::path::PathBuf;

use thiserror::Error;

use crate::ResourceId;

/// Failures while turning manifest sources into resources.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// A document could not be read into the base `kind` + `metadata` shape.
    #[error("{help}")]
    Malformed {
        origin: String,
        help: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("nested List in \"{origin}\": items of a List may not themselves be Lists")]
    NestedList { origin: String },

    /// The same identity was produced by two different sources.
    #[error("duplicate definition of {id}: found in \"{first}\" and \"{second}\"")]
    Collision { id: ResourceId, first: String, second: String },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    pub fn malformed(origin: &str, source: serde_yaml::Error) -> Self {
        Self::Malformed {
            origin: origin.to_string(),
            help: format!("Could not parse \"{origin}\".\n\nThis likely means it is malformed YAML.\n"),
            source,
        }
    }

    /// User-caused errors carry remediation text rather than a stack of causes.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::NestedList { .. } | Self::Collision { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource id {0:?}: expected namespace:kind/name")]
pub struct ParseIdError(pub String);
