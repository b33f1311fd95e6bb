//! Proxy descriptor and probe outcome models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Bookkeeping fields excluded from a proxy's identity (compared
/// case-insensitively). Fields prefixed with `_` are excluded as well.
const IDENTITY_DENY_LIST: &[&str] = &["name", "collectionname", "subname", "id"];

/// Marker prefix for caller-attached opaque fields.
pub const INTERNAL_FIELD_PREFIX: char = '_';

fn is_identity_field(key: &str) -> bool {
    !key.starts_with(INTERNAL_FIELD_PREFIX)
        && !IDENTITY_DENY_LIST
            .iter()
            .any(|deny| key.eq_ignore_ascii_case(deny))
}

/// Canonical JSON of the identity-relevant fields. serde_json maps are
/// key-sorted, so equal field sets always serialize identically.
fn identity_json(fields: &Map<String, Value>) -> String {
    let identity: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| is_identity_field(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(identity).to_string()
}

/// Arbitrary key-value configuration describing one proxy server.
///
/// The shape is deliberately open: type, name, server, port, credentials
/// and whatever metadata the caller attached. `_`-prefixed fields are
/// opaque caller bookkeeping and never affect probe identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyDescriptor(pub Map<String, Value>);

impl ProxyDescriptor {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.0.get("name").and_then(Value::as_str).unwrap_or("")
    }

    pub fn set_name(&mut self, name: String) {
        self.0.insert("name".to_string(), Value::String(name));
    }

    pub fn proxy_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("")
    }

    /// Caller-attached `_`-prefixed fields.
    pub fn internal_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0
            .iter()
            .filter(|(key, _)| key.starts_with(INTERNAL_FIELD_PREFIX))
    }
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.proxy_type(), self.name())
    }
}

/// A descriptor compiled to the harness wire format, tagged with its
/// position in the input batch.
#[derive(Debug, Clone)]
pub struct InternalProxy {
    pub wire: Map<String, Value>,
    pub index: usize,
}

impl InternalProxy {
    pub fn name(&self) -> &str {
        self.wire.get("name").and_then(Value::as_str).unwrap_or("")
    }

    /// Deterministic cache key for this probe target under the given
    /// probe parameters.
    pub fn fingerprint(&self, url: &str, method: &str, expected_status: u16) -> String {
        format!(
            "http-meta:availability:{url}:{method}:{expected_status}:{}",
            identity_json(&self.wire)
        )
    }
}

/// Terminal classification of one probed proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Valid { latency_ms: u64 },
    Failed,
}

/// Per-bucket results of a tested batch.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub valid: Vec<ProxyDescriptor>,
    pub failed: Vec<ProxyDescriptor>,
    pub incompatible: Vec<ProxyDescriptor>,
}

/// Result of running a batch through the checker.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// Nothing compiled to the harness format; the input is returned
    /// unchanged and no harness was started.
    Untested(Vec<ProxyDescriptor>),
    Tested(CheckReport),
}

impl BatchOutcome {
    /// Flatten into the caller-facing proxy list: survivors, plus the
    /// untested incompatible proxies when `keep_incompatible` is set.
    pub fn into_output(self, keep_incompatible: bool) -> Vec<ProxyDescriptor> {
        match self {
            BatchOutcome::Untested(proxies) => proxies,
            BatchOutcome::Tested(report) => {
                let mut output = report.valid;
                if keep_incompatible {
                    output.extend(report.incompatible);
                }
                output
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: Value) -> ProxyDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn descriptor_accessors() {
        let mut proxy = descriptor(json!({
            "name": "jp-1",
            "type": "ss",
            "server": "1.2.3.4",
            "port": 8388,
        }));
        assert_eq!(proxy.name(), "jp-1");
        assert_eq!(proxy.proxy_type(), "ss");

        proxy.set_name("[42ms] jp-1".to_string());
        assert_eq!(proxy.name(), "[42ms] jp-1");
    }

    #[test]
    fn fingerprint_ignores_bookkeeping_fields() {
        let base = InternalProxy {
            wire: json!({
                "name": "jp-1",
                "type": "ss",
                "server": "1.2.3.4",
                "port": 8388,
                "id": "abc",
                "subName": "my-sub",
                "collectionName": "all",
                "_subName": "my-sub",
                "_proxies_index": 0,
            })
            .as_object()
            .cloned()
            .unwrap(),
            index: 0,
        };
        let renamed = InternalProxy {
            wire: json!({
                "name": "another name",
                "type": "ss",
                "server": "1.2.3.4",
                "port": 8388,
                "_note": "different bookkeeping",
            })
            .as_object()
            .cloned()
            .unwrap(),
            index: 7,
        };

        let url = "http://example.com/gen204";
        assert_eq!(
            base.fingerprint(url, "head", 200),
            renamed.fingerprint(url, "head", 200)
        );
    }

    #[test]
    fn fingerprint_varies_with_identity_and_probe_params() {
        let wire = json!({"type": "ss", "server": "1.2.3.4", "port": 8388})
            .as_object()
            .cloned()
            .unwrap();
        let proxy = InternalProxy {
            wire: wire.clone(),
            index: 0,
        };
        let mut other_wire = wire;
        other_wire.insert("port".to_string(), json!(8389));
        let other = InternalProxy {
            wire: other_wire,
            index: 0,
        };

        let url = "http://example.com/gen204";
        assert_ne!(
            proxy.fingerprint(url, "head", 200),
            other.fingerprint(url, "head", 200)
        );
        assert_ne!(
            proxy.fingerprint(url, "head", 200),
            proxy.fingerprint(url, "get", 200)
        );
        assert_ne!(
            proxy.fingerprint(url, "head", 200),
            proxy.fingerprint(url, "head", 204)
        );
    }

    #[test]
    fn output_flattening_honors_keep_incompatible() {
        let valid = descriptor(json!({"name": "ok", "type": "ss"}));
        let bad = descriptor(json!({"name": "bad", "type": "ss"}));
        let odd = descriptor(json!({"name": "odd", "type": "exotic"}));
        let report = CheckReport {
            valid: vec![valid.clone()],
            failed: vec![bad],
            incompatible: vec![odd.clone()],
        };

        let kept = BatchOutcome::Tested(report.clone()).into_output(true);
        assert_eq!(kept, vec![valid.clone(), odd]);

        let dropped = BatchOutcome::Tested(report).into_output(false);
        assert_eq!(dropped, vec![valid]);
    }
}
