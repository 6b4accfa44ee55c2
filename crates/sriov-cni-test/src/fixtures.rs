//! Test fixtures for plugin requests
//!
//! Provides reusable network configurations and invocation arguments

use serde_json::{json, Map, Value};

use sriov_cni::cni::CniArgs;
use sriov_cni::NetConf;

/// The VF most scenarios attach.
pub const DEVICE: &str = "0000:03:02.1";

/// Interface name used inside the container.
pub const CONTAINER_IFNAME: &str = "net1";

/// Builds a network configuration request field by field
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    fields: Map<String, Value>,
}

impl RequestBuilder {
    /// Create a request for `device` with the CNI envelope filled in
    pub fn new(device: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("cniVersion".to_string(), json!("1.0.0"));
        fields.insert("name".to_string(), json!("sriov-net"));
        fields.insert("type".to_string(), json!("sriov"));
        fields.insert("deviceID".to_string(), json!(device));
        Self { fields }
    }

    /// Set one raw field
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Drop a field
    pub fn without(mut self, key: &str) -> Self {
        self.fields.remove(key);
        self
    }

    /// Hand back an attach record at the top level
    pub fn with_attach_record(self, record: Value) -> Self {
        self.with("attachRecord", record)
    }

    /// Hand back an attach record inside `prevResult`
    pub fn with_prev_result(self, record: Value) -> Self {
        self.with("prevResult", json!({ "attachRecord": record }))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn build(&self) -> NetConf {
        match NetConf::from_slice(self.to_json().to_string().as_bytes()) {
            Ok(conf) => conf,
            Err(e) => panic!("fixture request does not decode: {}", e),
        }
    }
}

/// Common request fixtures
pub mod requests {
    use super::*;

    /// VLAN 10 with spoof-check off on [`DEVICE`]
    pub fn vlan10_spoofchk_off() -> RequestBuilder {
        RequestBuilder::new(DEVICE)
            .with("vlan", json!(10))
            .with("spoofchk", json!("off"))
    }

    /// Every supported attribute set on [`DEVICE`]
    pub fn fully_configured() -> RequestBuilder {
        RequestBuilder::new(DEVICE)
            .with("mac", json!("02:11:22:33:44:55"))
            .with("vlan", json!(100))
            .with("vlanQoS", json!(5))
            .with("vlanProto", json!("802.1ad"))
            .with("min_tx_rate", json!(100))
            .with("max_tx_rate", json!(1000))
            .with("spoofchk", json!("off"))
            .with("trust", json!("on"))
            .with("link_state", json!("enable"))
    }

    /// Nothing but the device
    pub fn bare() -> RequestBuilder {
        RequestBuilder::new(DEVICE)
    }
}

/// Invocation arguments as the runtime would set them
pub fn cni_args(command: &str, netns: Option<&str>, ifname: &str) -> CniArgs {
    CniArgs {
        command: Some(command.to_string()),
        container_id: Some("test-container".to_string()),
        netns: netns.map(Into::into),
        ifname: Some(ifname.to_string()),
        ..Default::default()
    }
}
