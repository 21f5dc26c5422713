//! Observed interface state reported per node by nmstate

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::interface::InterfaceState;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::k8s::{ClusterApi, ResourceKind, ResourceRef};
use crate::sampler::TimeoutSampler;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObservedAddress {
    pub ip: String,
    #[serde(rename = "prefix-length")]
    pub prefix_length: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ObservedIpv4 {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default)]
    pub address: Vec<ObservedAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObservedInterface {
    pub name: String,
    #[serde(rename = "type")]
    pub iface_type: String,
    pub state: String,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub ipv4: Option<ObservedIpv4>,
}

impl ObservedInterface {
    pub fn is_in_state(&self, state: InterfaceState) -> bool {
        self.state == state.as_ref()
    }
}

/// `status.currentState` of one node's NodeNetworkState object
#[derive(Debug, Clone)]
pub struct NodeNetworkState {
    node: String,
    interfaces: Vec<ObservedInterface>,
}

pub fn node_state_ref(node: &str) -> ResourceRef {
    ResourceRef::cluster_scoped(ResourceKind::NODE_NETWORK_STATE, node)
}

impl NodeNetworkState {
    pub fn from_object(node: &str, object: &Value) -> AppResult<Self> {
        let interfaces = match object
            .get("status")
            .and_then(|s| s.get("currentState"))
            .and_then(|s| s.get("interfaces"))
        {
            Some(list) => serde_json::from_value(list.clone())?,
            None => Vec::new(),
        };
        Ok(Self {
            node: node.to_string(),
            interfaces,
        })
    }

    pub async fn fetch<C: ClusterApi>(cluster: &C, node: &str) -> AppResult<Self> {
        let object = cluster.get(&node_state_ref(node)).await?;
        Self::from_object(node, &object)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn interfaces(&self) -> &[ObservedInterface] {
        &self.interfaces
    }

    pub fn interface(&self, name: &str) -> Option<&ObservedInterface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// IPv4 addresses of `name` as `ip/prefix`
    pub fn ipv4_addresses(&self, name: &str) -> Vec<String> {
        self.interface(name)
            .and_then(|i| i.ipv4.as_ref())
            .filter(|ipv4| ipv4.enabled)
            .map(|ipv4| {
                ipv4.address
                    .iter()
                    .map(|a| format!("{}/{}", a.ip, a.prefix_length))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Wait until `node` reports `iface` in `state`.
///
/// `Absent` is reached when the interface is no longer listed.
pub async fn wait_for_interface_state<C: ClusterApi>(
    cluster: &C,
    node: &str,
    iface: &str,
    state: InterfaceState,
    timeout: Duration,
    interval: Duration,
) -> AppResult<Option<ObservedInterface>> {
    let observed = TimeoutSampler::new(timeout, interval, move || async move {
        let current = NodeNetworkState::fetch(cluster, node).await?;
        Ok(current.interface(iface).cloned())
    })
    .describe(format!("{} on {} to be {}", iface, node, state))
    .tolerate(ErrorKind::NotFound)
    .wait_for(|observed: &Option<ObservedInterface>| match (observed, state) {
        (None, InterfaceState::Absent) => true,
        (Some(i), _) => i.is_in_state(state),
        (None, _) => false,
    })
    .await?;

    debug!(node, iface, %state, "Interface reached state");
    Ok(observed)
}

/// Wait until `iface` on `node` reports at least one IPv4 address
pub async fn wait_for_ipv4_address<C: ClusterApi>(
    cluster: &C,
    node: &str,
    iface: &str,
    timeout: Duration,
    interval: Duration,
) -> AppResult<String> {
    let addresses = TimeoutSampler::new(timeout, interval, move || async move {
        let current = NodeNetworkState::fetch(cluster, node).await?;
        Ok(current.ipv4_addresses(iface))
    })
    .describe(format!("an IPv4 address on {} of {}", iface, node))
    .tolerate(ErrorKind::NotFound)
    .wait_for(|addresses: &Vec<String>| !addresses.is_empty())
    .await?;

    addresses
        .into_iter()
        .next()
        .ok_or_else(|| AppError::internal("accepted sample without an address"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::InMemoryCluster;
    use serde_json::json;

    fn nns(interfaces: Value) -> Value {
        json!({
            "metadata": {"name": "worker-1"},
            "status": {"currentState": {"interfaces": interfaces}}
        })
    }

    #[test]
    fn test_parse_current_state() {
        let object = nns(json!([
            {"name": "eth1", "type": "ethernet", "state": "up", "mtu": 1500,
             "ipv4": {"enabled": true, "address": [{"ip": "10.0.0.5", "prefix-length": 24}]}},
            {"name": "br1", "type": "linux-bridge", "state": "down"}
        ]));
        let state = NodeNetworkState::from_object("worker-1", &object).unwrap();

        assert_eq!(state.interfaces().len(), 2);
        assert!(state.interface("eth1").unwrap().is_in_state(InterfaceState::Up));
        assert_eq!(state.ipv4_addresses("eth1"), vec!["10.0.0.5/24"]);
        assert!(state.ipv4_addresses("br1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_interface_up() {
        let cluster = InMemoryCluster::new();
        let target = node_state_ref("worker-1");
        cluster.insert(&target, nns(json!([{"name": "vxlan10", "type": "vxlan", "state": "down"}])));

        let writer = cluster.clone();
        let flip = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            writer.set_status(
                &target,
                json!({"currentState": {"interfaces": [{"name": "vxlan10", "type": "vxlan", "state": "up"}]}}),
            );
        });

        let observed = wait_for_interface_state(
            &cluster,
            "worker-1",
            "vxlan10",
            InterfaceState::Up,
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        flip.await.unwrap();

        assert_eq!(observed.unwrap().state, "up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_absent_and_timeout() {
        let cluster = InMemoryCluster::new();
        cluster.insert(&node_state_ref("worker-1"), nns(json!([])));

        let gone = wait_for_interface_state(
            &cluster,
            "worker-1",
            "br1",
            InterfaceState::Absent,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(gone.is_none());

        let err = wait_for_ipv4_address(
            &cluster,
            "worker-1",
            "br1",
            Duration::from_secs(3),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
