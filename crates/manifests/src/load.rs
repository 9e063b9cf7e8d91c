use std::path::{Path, PathBuf};

use drift_core::{ManifestError, ResourceMap};
use rayon::prelude::*;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::multidoc::parse_multidoc;

/// Files with these extensions are read when walking a directory.
const MANIFEST_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

pub fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MANIFEST_EXTENSIONS.iter().any(|m| e.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Expand `paths` into the sorted, de-duplicated list of manifest files under them.
fn discover<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>, ManifestError> {
    let mut files = Vec::new();
    for root in paths {
        let root = root.as_ref();
        let meta = std::fs::metadata(root).map_err(|source| ManifestError::Io { path: root.to_path_buf(), source })?;
        if meta.is_file() {
            // Named explicitly, so parse whatever the extension
            files.push(root.to_path_buf());
            continue;
        }
        for entry in WalkDir::new(root).into_iter().filter_entry(|e| !is_hidden(e)) {
            let entry = entry.map_err(|err| {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                ManifestError::Io { path, source: err.into() }
            })?;
            if entry.file_type().is_file() && is_manifest_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Load every manifest file under `paths` and merge them into one map.
///
/// Files are parsed in parallel, each labelled with its own path. The same
/// identity defined in two different files is a [`ManifestError::Collision`].
pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<ResourceMap, ManifestError> {
    let files = discover(paths)?;
    debug!(files = files.len(), "discovered manifest files");

    let parsed = files
        .par_iter()
        .map(|path| {
            let content = std::fs::read(path).map_err(|source| ManifestError::Io { path: path.clone(), source })?;
            parse_multidoc(content, &path.to_string_lossy())
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Single reducer; `parsed` follows the sorted file order
    let mut out = ResourceMap::new();
    for map in parsed {
        for (id, res) in map {
            if let Some(prev) = out.get(&id) {
                return Err(ManifestError::Collision {
                    first: prev.source().to_string(),
                    second: res.source().to_string(),
                    id,
                });
            }
            out.insert(id, res);
        }
    }
    info!(files = files.len(), resources = out.len(), "loaded manifests");
    Ok(out)
}
