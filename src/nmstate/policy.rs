//! NodeNetworkConfigurationPolicy documents and their builders
//!
//! Each builder is consumed by `build()`, which validates the request and
//! computes the interface list once. The resulting
//! [`NodeNetworkConfigurationPolicy`] is what gets submitted to the cluster.

use std::net::IpAddr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::desired_state::DesiredState;
use super::interface::{
    validate_interface_name, BondConfig, BondMode, BridgeConfig, BridgeFlavor, InterfaceConfig, InterfaceSpec,
    Ipv4Config, VlanConfig, VxlanConfig, DEFAULT_VXLAN_PORT,
};
use crate::error::{AppError, AppResult};
use crate::k8s::{ClusterResource, ResourceKind, ResourceRef};

/// Node label the policy node selector matches on
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Highest 802.1Q VLAN id
pub const MAX_VLAN_ID: u16 = 4094;

/// VXLAN network identifiers are 24 bits wide
pub const VXLAN_ID_LIMIT: u32 = 1 << 24;

pub const DEFAULT_MIIMON: u32 = 120;

/// A built network policy, ready to be submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNetworkConfigurationPolicy {
    name: String,
    node: Option<String>,
    desired_state: DesiredState,
}

impl NodeNetworkConfigurationPolicy {
    pub fn new(name: impl Into<String>, node: Option<String>) -> Self {
        Self {
            name: name.into(),
            node,
            desired_state: DesiredState::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hostname the policy is restricted to; `None` applies it everywhere
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn desired_state(&self) -> &DesiredState {
        &self.desired_state
    }

    pub fn set_interface(&mut self, spec: InterfaceSpec) {
        self.desired_state.set_interface(spec);
    }

    /// Ask nmstate to remove every interface of this policy
    pub fn mark_absent(&mut self) {
        self.desired_state.mark_absent();
    }
}

impl ClusterResource for NodeNetworkConfigurationPolicy {
    fn target(&self) -> ResourceRef {
        ResourceRef::cluster_scoped(ResourceKind::NODE_NETWORK_CONFIGURATION_POLICY, &self.name)
    }

    fn to_body(&self) -> AppResult<Value> {
        let mut spec = json!({ "desiredState": serde_json::to_value(&self.desired_state)? });
        if let Some(node) = &self.node {
            spec["nodeSelector"] = json!({ HOSTNAME_LABEL: node });
        }

        let mut body = self.target().envelope();
        body["spec"] = spec;
        Ok(body)
    }
}

fn validate_policy_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::invalid_state("policy name must not be empty"));
    }
    Ok(())
}

fn validate_node(node: &Option<String>) -> AppResult<()> {
    match node {
        Some(n) if n.trim().is_empty() => Err(AppError::invalid_state("node selector must not be empty")),
        _ => Ok(()),
    }
}

/// Linux or OVS bridge
#[derive(Debug, Clone)]
pub struct BridgePolicy {
    name: String,
    bridge: String,
    flavor: BridgeFlavor,
    ports: Vec<String>,
    mtu: Option<u32>,
    stp: bool,
    ipv4: Option<Ipv4Config>,
    node: Option<String>,
}

impl BridgePolicy {
    fn new(flavor: BridgeFlavor, name: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bridge: bridge.into(),
            flavor,
            ports: Vec::new(),
            mtu: None,
            stp: false,
            ipv4: None,
            node: None,
        }
    }

    pub fn linux(name: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self::new(BridgeFlavor::Linux, name, bridge)
    }

    pub fn ovs(name: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self::new(BridgeFlavor::Ovs, name, bridge)
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.ports.push(port.into());
        self
    }

    pub fn ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports.extend(ports.into_iter().map(Into::into));
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn stp(mut self, enabled: bool) -> Self {
        self.stp = enabled;
        self
    }

    pub fn ipv4(mut self, ipv4: Ipv4Config) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge
    }

    pub fn port_names(&self) -> &[String] {
        &self.ports
    }

    pub fn build(self) -> AppResult<NodeNetworkConfigurationPolicy> {
        validate_policy_name(&self.name)?;
        validate_node(&self.node)?;
        validate_interface_name(&self.bridge)?;
        for port in &self.ports {
            validate_interface_name(port)?;
        }

        let mut policy = NodeNetworkConfigurationPolicy::new(self.name, self.node);
        if self.mtu.is_some() {
            for port in &self.ports {
                policy.set_interface(InterfaceSpec::ethernet(port.as_str()).with_mtu(self.mtu));
            }
        }

        let config = match self.flavor {
            BridgeFlavor::Linux => BridgeConfig::linux(self.ports),
            BridgeFlavor::Ovs => BridgeConfig::ovs(self.ports),
        }
        .with_stp(self.stp);
        policy.set_interface(
            InterfaceSpec::new(self.bridge, InterfaceConfig::Bridge(config))
                .with_mtu(self.mtu)
                .with_ipv4(self.ipv4),
        );
        Ok(policy)
    }
}

/// Bond aggregating ethernet slaves
#[derive(Debug, Clone)]
pub struct BondPolicy {
    name: String,
    bond: String,
    slaves: Vec<String>,
    mode: BondMode,
    miimon: Option<u32>,
    mtu: Option<u32>,
    ipv4: Option<Ipv4Config>,
    node: Option<String>,
}

impl BondPolicy {
    pub fn new(name: impl Into<String>, bond: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bond: bond.into(),
            slaves: Vec::new(),
            mode: BondMode::default(),
            miimon: Some(DEFAULT_MIIMON),
            mtu: None,
            ipv4: None,
            node: None,
        }
    }

    pub fn slaves<I, S>(mut self, slaves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.slaves.extend(slaves.into_iter().map(Into::into));
        self
    }

    pub fn mode(mut self, mode: BondMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn miimon(mut self, miimon: Option<u32>) -> Self {
        self.miimon = miimon;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn ipv4(mut self, ipv4: Ipv4Config) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn build(self) -> AppResult<NodeNetworkConfigurationPolicy> {
        validate_policy_name(&self.name)?;
        validate_node(&self.node)?;
        validate_interface_name(&self.bond)?;
        if self.slaves.is_empty() {
            return Err(AppError::InvalidState(format!("bond {} has no slaves", self.bond)));
        }
        for slave in &self.slaves {
            validate_interface_name(slave)?;
        }

        let mut policy = NodeNetworkConfigurationPolicy::new(self.name, self.node);
        for slave in &self.slaves {
            policy.set_interface(InterfaceSpec::ethernet(slave.as_str()).with_mtu(self.mtu));
        }
        policy.set_interface(
            InterfaceSpec::new(
                self.bond,
                InterfaceConfig::Bond(BondConfig {
                    mode: self.mode,
                    slaves: self.slaves,
                    miimon: self.miimon,
                }),
            )
            .with_mtu(self.mtu)
            .with_ipv4(self.ipv4),
        );
        Ok(policy)
    }
}

/// 802.1Q VLAN on top of a base interface
#[derive(Debug, Clone)]
pub struct VlanPolicy {
    name: String,
    base_iface: String,
    tag: u16,
    iface: Option<String>,
    mtu: Option<u32>,
    ipv4: Option<Ipv4Config>,
    node: Option<String>,
}

impl VlanPolicy {
    pub fn new(name: impl Into<String>, base_iface: impl Into<String>, tag: u16) -> Self {
        Self {
            name: name.into(),
            base_iface: base_iface.into(),
            tag,
            iface: None,
            mtu: None,
            ipv4: None,
            node: None,
        }
    }

    /// Interface name; defaults to `<base>.<tag>`
    pub fn iface(mut self, iface: impl Into<String>) -> Self {
        self.iface = Some(iface.into());
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn ipv4(mut self, ipv4: Ipv4Config) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn iface_name(&self) -> String {
        self.iface
            .clone()
            .unwrap_or_else(|| format!("{}.{}", self.base_iface, self.tag))
    }

    pub fn build(self) -> AppResult<NodeNetworkConfigurationPolicy> {
        validate_policy_name(&self.name)?;
        validate_node(&self.node)?;
        validate_interface_name(&self.base_iface)?;
        if !(1..=MAX_VLAN_ID).contains(&self.tag) {
            return Err(AppError::InvalidState(format!(
                "VLAN tag {} is outside 1..={}",
                self.tag, MAX_VLAN_ID
            )));
        }
        let iface = self.iface_name();
        validate_interface_name(&iface)?;

        let mut policy = NodeNetworkConfigurationPolicy::new(self.name, self.node);
        policy.set_interface(
            InterfaceSpec::new(
                iface,
                InterfaceConfig::Vlan(VlanConfig {
                    base_iface: self.base_iface,
                    id: self.tag,
                }),
            )
            .with_mtu(self.mtu)
            .with_ipv4(self.ipv4),
        );
        Ok(policy)
    }
}

/// VXLAN tunnel endpoint
#[derive(Debug, Clone)]
pub struct VxlanPolicy {
    name: String,
    iface: String,
    vxlan_id: u32,
    base_iface: String,
    remote: IpAddr,
    destination_port: u16,
    node: Option<String>,
}

impl VxlanPolicy {
    pub fn new(
        name: impl Into<String>,
        iface: impl Into<String>,
        vxlan_id: u32,
        base_iface: impl Into<String>,
        remote: IpAddr,
    ) -> Self {
        Self {
            name: name.into(),
            iface: iface.into(),
            vxlan_id,
            base_iface: base_iface.into(),
            remote,
            destination_port: DEFAULT_VXLAN_PORT,
            node: None,
        }
    }

    pub fn destination_port(mut self, port: u16) -> Self {
        self.destination_port = port;
        self
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn iface_name(&self) -> &str {
        &self.iface
    }

    pub fn node_name(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn build(self) -> AppResult<NodeNetworkConfigurationPolicy> {
        validate_policy_name(&self.name)?;
        validate_node(&self.node)?;
        validate_interface_name(&self.iface)?;
        validate_interface_name(&self.base_iface)?;
        if self.vxlan_id >= VXLAN_ID_LIMIT {
            return Err(AppError::InvalidState(format!(
                "VXLAN id {} does not fit in 24 bits",
                self.vxlan_id
            )));
        }

        let mut policy = NodeNetworkConfigurationPolicy::new(self.name, self.node);
        policy.set_interface(InterfaceSpec::new(
            self.iface,
            InterfaceConfig::Vxlan(VxlanConfig {
                id: self.vxlan_id,
                base_iface: self.base_iface,
                remote: self.remote,
                destination_port: self.destination_port,
            }),
        ));
        Ok(policy)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

impl PolicyCondition {
    pub fn transitioned_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// What a status must have seen before it describes the desired state last
/// written to the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusExpectation {
    /// `metadata.generation` returned by the last write
    pub generation: Option<i64>,
    /// When the last write was sent, for controllers that do not report
    /// `observedGeneration`
    pub since: Option<DateTime<Utc>>,
}

impl StatusExpectation {
    pub fn for_generation(generation: Option<i64>) -> Self {
        Self { generation, since: None }
    }

    /// Expectation for a write of `generation` sent at `since`. Condition
    /// timestamps have second precision, so `since` is truncated.
    pub fn after_write(generation: Option<i64>, since: DateTime<Utc>) -> Self {
        Self {
            generation,
            since: Some(since.trunc_subsecs(0)),
        }
    }
}

/// `status.conditions` of a policy (or enactment) as reported by nmstate
#[derive(Debug, Clone, Default)]
pub struct PolicyStatus {
    pub observed_generation: Option<i64>,
    pub conditions: Vec<PolicyCondition>,
}

impl PolicyStatus {
    pub fn from_object(object: &Value) -> Self {
        let status = object.get("status");
        let observed_generation = status
            .and_then(|s| s.get("observedGeneration"))
            .and_then(Value::as_i64);
        let conditions = status
            .and_then(|s| s.get("conditions"))
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();
        Self {
            observed_generation,
            conditions,
        }
    }

    /// Whether condition `type_` was computed for the expected write.
    ///
    /// `observedGeneration` decides when both sides carry a generation;
    /// otherwise the condition must have transitioned at or after the write.
    pub fn reflects(&self, expected: &StatusExpectation, type_: &str) -> bool {
        if let (Some(observed), Some(wanted)) = (self.observed_generation, expected.generation) {
            return observed >= wanted;
        }
        match expected.since {
            None => true,
            Some(since) => self
                .condition(type_)
                .and_then(PolicyCondition::transitioned_at)
                .is_some_and(|at| at >= since),
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&PolicyCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    fn is_true(&self, type_: &str) -> bool {
        self.condition(type_).is_some_and(|c| c.status == "True")
    }

    pub fn is_available(&self) -> bool {
        self.is_true("Available")
    }

    pub fn is_progressing(&self) -> bool {
        self.is_true("Progressing")
    }

    /// Message of a `Degraded=True` condition, if the policy failed
    pub fn degraded_message(&self) -> Option<String> {
        self.condition("Degraded").filter(|c| c.status == "True").map(|c| {
            c.message
                .clone()
                .or_else(|| c.reason.clone())
                .unwrap_or_else(|| "no message".to_string())
        })
    }
}
