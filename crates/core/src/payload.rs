//! Schema-less payload containers.
//!
//! Request params/query captured for auditing are stored verbatim; nothing in
//! the pipeline inspects them beyond serialization.

/// String-keyed map of dynamically typed JSON values.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Build a [`JsonMap`] from string pairs (path params, query strings).
pub fn string_map<I, K, V>(pairs: I) -> JsonMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), serde_json::Value::String(v.into())))
        .collect()
}
