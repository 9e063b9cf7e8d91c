//! Lenient field decoders for loosely written manifests.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

/// Treat an explicit `null` the same as a missing field.
pub(crate) fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Accept any scalar where a string is expected (`name: 1234`, `ignore: true`).
pub(crate) fn scalar<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?.unwrap_or(Value::Null);
    scalar_to_string(v).map_err(D::Error::custom)
}

pub(crate) fn scalar_map<'de, D>(d: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(d)?.unwrap_or_default();
    raw.into_iter()
        .map(|(k, v)| scalar_to_string(v).map(|s| (k, s)).map_err(D::Error::custom))
        .collect()
}

fn scalar_to_string(v: Value) -> Result<String, String> {
    match v {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Tagged(t) => scalar_to_string(t.value),
        other => Err(format!("expected a scalar value, found {}", kind_of(&other))),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        _ => "a scalar",
    }
}
