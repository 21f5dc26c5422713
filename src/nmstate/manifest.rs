//! YAML manifests listing the policies to render, apply or delete

use std::net::IpAddr;

use serde::Deserialize;

use super::interface::BondMode;
use super::policy::{BondPolicy, BridgePolicy, NodeNetworkConfigurationPolicy, VlanPolicy, VxlanPolicy};
use crate::error::{AppError, AppResult};

/// One entry of a manifest, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PolicyRequest {
    LinuxBridge {
        name: String,
        bridge: String,
        #[serde(default)]
        ports: Vec<String>,
        mtu: Option<u32>,
        #[serde(default)]
        stp: bool,
        node: Option<String>,
    },
    OvsBridge {
        name: String,
        bridge: String,
        #[serde(default)]
        ports: Vec<String>,
        mtu: Option<u32>,
        #[serde(default)]
        stp: bool,
        node: Option<String>,
    },
    Bond {
        name: String,
        bond: String,
        slaves: Vec<String>,
        #[serde(default)]
        mode: BondMode,
        miimon: Option<u32>,
        mtu: Option<u32>,
        node: Option<String>,
    },
    Vlan {
        name: String,
        base_iface: String,
        tag: u16,
        iface: Option<String>,
        mtu: Option<u32>,
        node: Option<String>,
    },
    Vxlan {
        name: String,
        iface: String,
        vxlan_id: u32,
        base_iface: String,
        remote: IpAddr,
        destination_port: Option<u16>,
        node: Option<String>,
    },
}

fn bridge_policy(
    mut policy: BridgePolicy,
    ports: Vec<String>,
    mtu: Option<u32>,
    stp: bool,
    node: Option<String>,
) -> AppResult<NodeNetworkConfigurationPolicy> {
    policy = policy.ports(ports).stp(stp);
    if let Some(mtu) = mtu {
        policy = policy.mtu(mtu);
    }
    if let Some(node) = node {
        policy = policy.node(node);
    }
    policy.build()
}

impl PolicyRequest {
    pub fn name(&self) -> &str {
        match self {
            PolicyRequest::LinuxBridge { name, .. }
            | PolicyRequest::OvsBridge { name, .. }
            | PolicyRequest::Bond { name, .. }
            | PolicyRequest::Vlan { name, .. }
            | PolicyRequest::Vxlan { name, .. } => name,
        }
    }

    pub fn build(self) -> AppResult<NodeNetworkConfigurationPolicy> {
        match self {
            PolicyRequest::LinuxBridge {
                name,
                bridge,
                ports,
                mtu,
                stp,
                node,
            } => bridge_policy(BridgePolicy::linux(name, bridge), ports, mtu, stp, node),
            PolicyRequest::OvsBridge {
                name,
                bridge,
                ports,
                mtu,
                stp,
                node,
            } => bridge_policy(BridgePolicy::ovs(name, bridge), ports, mtu, stp, node),
            PolicyRequest::Bond {
                name,
                bond,
                slaves,
                mode,
                miimon,
                mtu,
                node,
            } => {
                let mut policy = BondPolicy::new(name, bond).slaves(slaves).mode(mode);
                if miimon.is_some() {
                    policy = policy.miimon(miimon);
                }
                if let Some(mtu) = mtu {
                    policy = policy.mtu(mtu);
                }
                if let Some(node) = node {
                    policy = policy.node(node);
                }
                policy.build()
            }
            PolicyRequest::Vlan {
                name,
                base_iface,
                tag,
                iface,
                mtu,
                node,
            } => {
                let mut policy = VlanPolicy::new(name, base_iface, tag);
                if let Some(iface) = iface {
                    policy = policy.iface(iface);
                }
                if let Some(mtu) = mtu {
                    policy = policy.mtu(mtu);
                }
                if let Some(node) = node {
                    policy = policy.node(node);
                }
                policy.build()
            }
            PolicyRequest::Vxlan {
                name,
                iface,
                vxlan_id,
                base_iface,
                remote,
                destination_port,
                node,
            } => {
                let mut policy = VxlanPolicy::new(name, iface, vxlan_id, base_iface, remote);
                if let Some(port) = destination_port {
                    policy = policy.destination_port(port);
                }
                if let Some(node) = node {
                    policy = policy.node(node);
                }
                policy.build()
            }
        }
    }
}

/// Parse a manifest and build every policy in it, in order
pub fn parse_manifest(text: &str) -> AppResult<Vec<NodeNetworkConfigurationPolicy>> {
    let requests: Vec<PolicyRequest> =
        serde_yaml::from_str(text).map_err(|e| AppError::Config(format!("invalid manifest: {}", e)))?;
    requests.into_iter().map(PolicyRequest::build).collect()
}
