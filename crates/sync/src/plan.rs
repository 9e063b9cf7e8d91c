//! Diff a desired resource set against the cluster's and decide what to apply or delete.

use drift_core::{Policy, ResourceMap, SyncAction, SyncOp};
use serde::Serialize;
use tracing::debug;

/// Compute the actions that converge `actual` towards `desired`.
///
/// Deletions come first, then applies; each pass follows identity order.
/// A resource is left alone when either side carries the `ignore` policy.
/// Nothing is deleted unless `allow_deletes` is set and `actual` holds at
/// least one resource: an empty cluster export means the state is unknown.
pub fn plan(desired: &ResourceMap, actual: &ResourceMap, allow_deletes: bool) -> Vec<SyncAction> {
    let mut actions = Vec::new();

    if allow_deletes && !actual.is_empty() {
        for (id, res) in actual {
            if desired.contains_key(id) {
                continue;
            }
            if res.policies().contains(&Policy::IGNORE) {
                debug!(%id, ignore = "delete", "skipping ignored resource");
                continue;
            }
            actions.push(SyncAction::delete(res));
        }
    }

    for (id, res) in desired {
        if res.policies().contains(&Policy::IGNORE) {
            debug!(%id, ignore = "apply", "skipping ignored resource");
            continue;
        }
        // A live annotation can freeze a resource the repo does not mark
        if let Some(live) = actual.get(id) {
            if live.policies().contains(&Policy::IGNORE) {
                debug!(%id, ignore = "apply", "skipping resource ignored in cluster");
                continue;
            }
        }
        actions.push(SyncAction::apply(res));
    }

    actions
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub applies: usize,
    pub deletes: usize,
}

impl PlanSummary {
    pub fn of(actions: &[SyncAction]) -> Self {
        actions.iter().fold(Self::default(), |mut s, a| {
            match a.op {
                SyncOp::Apply => s.applies += 1,
                SyncOp::Delete => s.deletes += 1,
            }
            s
        })
    }
}
