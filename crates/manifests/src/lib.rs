//! Drift manifests: turn YAML document streams and manifest directories into resource maps.

#![forbid(unsafe_code)]

mod load;
mod multidoc;

pub use load::{is_manifest_file, load};
pub use multidoc::{parse_multidoc, split_documents, LIST_KIND};
