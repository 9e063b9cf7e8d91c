use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use drift_core::{ManifestError, Resource, ResourceMap};
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, trace};

/// Kind of the collection document whose `items` are expanded in place.
pub const LIST_KIND: &str = "List";

#[derive(Deserialize)]
struct ListDoc {
    #[serde(default)]
    items: Option<Vec<Value>>,
}

/// Byte ranges of the documents in a YAML stream, in order.
///
/// A line starting with `---` (or the `...` end marker) separates documents;
/// the marker line itself belongs to no document. Content on the marker line
/// after `--- ` starts the next document. Single pass over the input.
pub fn split_documents(content: &[u8]) -> Vec<Range<usize>> {
    let mut docs = Vec::new();
    let mut start = 0usize;
    let mut pos = 0usize;
    while pos < content.len() {
        let end = match content[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => pos + i + 1,
            None => content.len(),
        };
        if let Some(next) = marker(&content[pos..end]) {
            docs.push(start..pos);
            start = pos + next;
        }
        pos = end;
    }
    docs.push(start..content.len());
    docs
}

/// If `line` is a document marker, the offset within it where the next document starts.
fn marker(line: &[u8]) -> Option<usize> {
    let trimmed = trim_eol(line);
    let rest = trimmed.strip_prefix(b"---").or_else(|| trimmed.strip_prefix(b"..."))?;
    match rest.first() {
        None => Some(line.len()),
        Some(b' ') | Some(b'\t') => {
            let inline = rest.iter().position(|b| !b.is_ascii_whitespace());
            match inline {
                Some(i) if rest[i] != b'#' => Some(3 + i),
                _ => Some(line.len()),
            }
        }
        Some(_) => None,
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let mut l = line;
    while let [rest @ .., b'\n' | b'\r'] = l {
        l = rest;
    }
    l
}

/// Spans holding nothing but whitespace, comments and `%` directives.
///
/// Directives are only legal ahead of a `---` marker, so a span made of them
/// is the preamble of the next document, which parses the same without it.
fn is_blank(doc: &[u8]) -> bool {
    doc.split(|&b| b == b'\n').all(|line| {
        if line.first() == Some(&b'%') {
            return true;
        }
        match line.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(i) => line[i] == b'#',
            None => true,
        }
    })
}

/// Parse a stream of YAML documents into resources keyed by identity.
///
/// Comment-only documents and documents without a kind are dropped; `List`
/// documents are expanded into their items. Within one stream a repeated
/// identity replaces the earlier one. Any document that does not decode into
/// the base shape fails the whole stream.
pub fn parse_multidoc(content: impl Into<Bytes>, source: &str) -> Result<ResourceMap, ManifestError> {
    let started = Instant::now();
    let buf: Bytes = content.into();
    let src: Arc<str> = Arc::from(source);
    let mut out = ResourceMap::new();

    for span in split_documents(&buf) {
        let doc = buf.slice(span);
        if is_blank(&doc) {
            continue;
        }
        let value: Value = serde_yaml::from_slice(&doc).map_err(|e| ManifestError::malformed(source, e))?;
        if value.is_null() {
            continue;
        }
        if kind_of(&value) == Some(LIST_KIND) {
            expand_list(&src, value, &mut out)?;
            continue;
        }
        match Resource::from_value(&src, doc, value).map_err(|e| ManifestError::malformed(source, e))? {
            Some(res) => insert(&mut out, res),
            None => trace!(source, "skipping document without kind"),
        }
    }

    histogram!("manifest_parse_ms", started.elapsed().as_secs_f64() * 1000.0);
    counter!("manifests_parsed_total", out.len() as u64);
    debug!(source, resources = out.len(), "parsed manifest stream");
    Ok(out)
}

fn kind_of(value: &Value) -> Option<&str> {
    value.get("kind").and_then(Value::as_str)
}

fn expand_list(src: &Arc<str>, value: Value, out: &mut ResourceMap) -> Result<(), ManifestError> {
    let list: ListDoc = serde_yaml::from_value(value).map_err(|e| ManifestError::malformed(src, e))?;
    for item in list.items.unwrap_or_default() {
        if kind_of(&item) == Some(LIST_KIND) {
            return Err(ManifestError::NestedList { origin: src.to_string() });
        }
        // Items have no span of their own; each is carried as a standalone document
        let raw = serde_yaml::to_string(&item).map_err(|e| ManifestError::malformed(src, e))?;
        if let Some(res) = Resource::from_value(src, Bytes::from(raw), item).map_err(|e| ManifestError::malformed(src, e))? {
            insert(out, res);
        }
    }
    Ok(())
}

fn insert(out: &mut ResourceMap, res: Resource) {
    let id = res.id();
    if out.contains_key(&id) {
        debug!(%id, source = res.source(), "later document replaces earlier one");
    }
    out.insert(id, res);
}
