use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded sha256 of the input bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable stringification: object keys sorted lexicographically, null
/// object values dropped, no insignificant whitespace. Two structurally
/// equal values always render identically, independent of construction
/// order.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

/// Content hash of a JSON value via its stable rendering.
pub fn stable_hash(value: &Value) -> String {
    sha256_hex(stable_stringify(value).as_bytes())
}

/// Cache key for an agent invocation.
pub fn agent_cache_key(
    provider: &str,
    model: &str,
    agent_name: &str,
    prompt_version: &str,
    schema_version: &str,
    input: &Value,
) -> String {
    let joined = format!(
        "{provider}|{model}|{agent_name}|{prompt_version}|{schema_version}|{}",
        stable_hash(input)
    );
    sha256_hex(joined.as_bytes())
}

/// Cache key for a derived artifact.
pub fn derived_cache_key(
    artifact_type: &str,
    sources: &Value,
    schema_version: &str,
    prompt_version: &str,
) -> String {
    let joined = format!(
        "{artifact_type}|{}|{schema_version}|{prompt_version}",
        stable_hash(sources)
    );
    sha256_hex(joined.as_bytes())
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys are strings; serde_json renders them exactly.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
