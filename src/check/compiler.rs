//! Compilation of proxy descriptors to the harness wire format

use crate::check::models::{ProxyDescriptor, INTERNAL_FIELD_PREFIX};
use crate::error::Error;
use crate::Result;
use serde_json::{Map, Value};

/// External collaborator boundary: turns a descriptor into the wire
/// object the harness accepts, or rejects it as incompatible.
pub trait ProxyCompiler: Send + Sync {
    fn compile(&self, descriptor: &ProxyDescriptor) -> Result<Map<String, Value>>;
}

/// Proxy types the ClashMeta core understands.
const SUPPORTED_TYPES: &[&str] = &[
    "http", "socks5", "ss", "ssr", "trojan", "vmess", "vless", "hysteria", "hysteria2", "tuic",
    "wireguard",
];

/// Compiler targeting a ClashMeta-based harness.
///
/// Validation is intentionally shallow: the harness rejects anything it
/// cannot actually run, so this only filters descriptors that plainly
/// cannot become a ClashMeta outbound.
#[derive(Debug, Clone, Default)]
pub struct ClashCompiler;

impl ClashCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl ProxyCompiler for ClashCompiler {
    fn compile(&self, descriptor: &ProxyDescriptor) -> Result<Map<String, Value>> {
        let proxy_type = descriptor.proxy_type();
        if proxy_type.is_empty() {
            return Err(Error::Compile(format!(
                "{}: missing proxy type",
                descriptor.name()
            )));
        }
        if !SUPPORTED_TYPES.contains(&proxy_type) {
            return Err(Error::Compile(format!(
                "{}: unsupported type {proxy_type}",
                descriptor.name()
            )));
        }

        let server = descriptor
            .fields()
            .get("server")
            .and_then(Value::as_str)
            .unwrap_or("");
        if server.is_empty() {
            return Err(Error::Compile(format!(
                "{}: missing server",
                descriptor.name()
            )));
        }

        let port = match descriptor.fields().get("port") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse::<u64>().ok(),
            _ => None,
        };
        let port = match port {
            Some(p) if (1..=65535).contains(&p) => p,
            _ => {
                return Err(Error::Compile(format!(
                    "{}: missing or invalid port",
                    descriptor.name()
                )))
            }
        };

        let mut wire: Map<String, Value> = descriptor
            .fields()
            .iter()
            .filter(|(key, _)| !key.starts_with(INTERNAL_FIELD_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        wire.insert("port".to_string(), Value::from(port));

        Ok(wire)
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
    fn compiles_supported_descriptor() {
        let compiler = ClashCompiler::new();
        let wire = compiler
            .compile(&descriptor(json!({
                "name": "jp-1",
                "type": "ss",
                "server": "1.2.3.4",
                "port": "8388",
                "cipher": "aes-128-gcm",
                "password": "secret",
                "_subName": "my-sub",
            })))
            .unwrap();

        assert_eq!(wire.get("port"), Some(&json!(8388)));
        assert_eq!(wire.get("server"), Some(&json!("1.2.3.4")));
        // internal fields are not part of the compiled form; the engine
        // copies them back afterwards
        assert!(!wire.contains_key("_subName"));
    }

    #[test]
    fn rejects_unsupported_type() {
        let compiler = ClashCompiler::new();
        let err = compiler
            .compile(&descriptor(json!({
                "name": "odd",
                "type": "snell",
                "server": "1.2.3.4",
                "port": 1234,
            })))
            .unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn rejects_missing_server_or_port() {
        let compiler = ClashCompiler::new();
        assert!(compiler
            .compile(&descriptor(json!({"name": "a", "type": "ss", "port": 1})))
            .is_err());
        assert!(compiler
            .compile(&descriptor(
                json!({"name": "b", "type": "ss", "server": "x"})
            ))
            .is_err());
        assert!(compiler
            .compile(&descriptor(
                json!({"name": "c", "type": "ss", "server": "x", "port": 0})
            ))
            .is_err());
        assert!(compiler
            .compile(&descriptor(
                json!({"name": "d", "type": "ss", "server": "x", "port": 70000})
            ))
            .is_err());
    }
}
