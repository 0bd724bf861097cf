//! Configuration loading: the four YAML-shaped structures the binary loads
//! at startup (network topology, control descriptor, default payloads,
//! glitch payloads).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::node::NodeConfig;

/// Top-level network configuration file: `node_name -> NodeConfig`.
pub type NetworkConfig = HashMap<String, NodeConfig>;

/// Required/optional payload shape for one control request type, loaded
/// from the control descriptor YAML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PayloadDescriptor {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequestDescriptor {
    #[serde(default)]
    pub payload: PayloadDescriptor,
}

/// `request_type -> { payload: { required, optional } }`.
pub type ControlDescriptor = HashMap<String, RequestDescriptor>;

/// `message_name -> nested_map`, fed to the interface's `decode` to produce
/// a typed default (network config) or kept as-is (glitch shadow).
pub type PayloadFile = HashMap<String, Value>;

pub fn load_network(path: impl AsRef<Path>) -> Result<NetworkConfig> {
    load_yaml(path, "network configuration")
}

pub fn load_descriptor(path: impl AsRef<Path>) -> Result<ControlDescriptor> {
    load_yaml(path, "control descriptor")
}

pub fn load_default_payloads(path: impl AsRef<Path>) -> Result<PayloadFile> {
    load_yaml(path, "default payload file")
}

pub fn load_glitch_payloads(path: impl AsRef<Path>) -> Result<PayloadFile> {
    load_yaml(path, "glitch payload file")
}

fn load_yaml<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>, what: &str) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {what} at {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {what} at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_network_config() {
        let yaml = r#"
A:
  protocol: SPEC_TCP
  role: SERVER
  host: 127.0.0.1
  port: 9000
  messages:
    Ping:
      direction: in
    Pong:
      direction: out
      periodic: false
"#;
        let config: NetworkConfig = serde_yaml::from_str(yaml).unwrap();
        let node = config.get("A").unwrap();
        assert_eq!(node.host, "127.0.0.1");
        assert_eq!(node.messages.len(), 2);
    }

    #[test]
    fn parses_control_descriptor_with_defaults() {
        let yaml = r#"
SendMessageRequest:
  payload:
    required: [message]
    optional:
      node: null
"#;
        let descriptor: ControlDescriptor = serde_yaml::from_str(yaml).unwrap();
        let entry = descriptor.get("SendMessageRequest").unwrap();
        assert_eq!(entry.payload.required, vec!["message".to_string()]);
        assert!(entry.payload.optional.contains_key("node"));
    }

    #[test]
    fn missing_file_is_an_error_with_context() {
        let err = load_network("/nonexistent/path/network.yaml").unwrap_err();
        assert!(err.to_string().contains("network configuration"));
    }

    #[test]
    fn loads_network_config_from_an_actual_file() {
        let yaml = r#"
A:
  protocol: TCP
  role: CLIENT
  host: 127.0.0.1
  port: 9001
  messages: {}
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.yaml");
        std::fs::write(&path, yaml).unwrap();
        let config = load_network(&path).unwrap();
        assert_eq!(config.get("A").unwrap().port, 9001);
    }
}
