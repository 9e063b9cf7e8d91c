//! Policies declared through annotations.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Annotation keys under this prefix declare policies.
pub const POLICY_PREFIX: &str = "flux.weave.works/";

const TRUE: &str = "true";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Policy(Cow<'static, str>);

impl Policy {
    /// Exclude the resource from automated apply and delete.
    pub const IGNORE: Policy = Policy(Cow::Borrowed("ignore"));
    pub const AUTOMATED: Policy = Policy(Cow::Borrowed("automated"));
    pub const LOCKED: Policy = Policy(Cow::Borrowed("locked"));

    pub fn new(name: impl Into<String>) -> Self { Self(Cow::Owned(name.into())) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Named policies with their values; boolean policies carry `"true"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PolicySet(BTreeMap<Policy, String>);

impl PolicySet {
    /// Derive policies from annotations carrying [`POLICY_PREFIX`]; other keys are ignored.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let mut set = PolicySet::default();
        for (k, v) in annotations {
            let Some(name) = k.strip_prefix(POLICY_PREFIX) else { continue };
            let policy = Policy::new(name);
            if v == TRUE {
                set.add(policy);
            } else {
                set.set(policy, v.clone());
            }
        }
        set
    }

    pub fn add(&mut self, policy: Policy) { self.0.insert(policy, TRUE.to_string()); }

    pub fn set(&mut self, policy: Policy, value: impl Into<String>) { self.0.insert(policy, value.into()); }

    /// Membership by name, whatever the value.
    pub fn contains(&self, policy: &Policy) -> bool { self.0.contains_key(policy) }

    pub fn get(&self, policy: &Policy) -> Option<&str> { self.0.get(policy).map(String::as_str) }

    pub fn iter(&self) -> impl Iterator<Item = (&Policy, &str)> { self.0.iter().map(|(k, v)| (k, v.as_str())) }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
