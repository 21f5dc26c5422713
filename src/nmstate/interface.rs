//! Interface entries of an nmstate desired state

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{AppError, AppResult};

/// Longest interface name the kernel accepts
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Default VXLAN UDP port (IANA)
pub const DEFAULT_VXLAN_PORT: u16 = 4789;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    Up,
    Down,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    Ethernet,
    LinuxBridge,
    OvsBridge,
    Bond,
    Vlan,
    Vxlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeFlavor {
    Linux,
    Ovs,
}

/// Ports and options of a bridge.
///
/// Only the two concrete flavors can be built: [`BridgeConfig::linux`] and
/// [`BridgeConfig::ovs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    flavor: BridgeFlavor,
    ports: Vec<String>,
    stp: bool,
}

impl BridgeConfig {
    fn new(flavor: BridgeFlavor, ports: Vec<String>) -> Self {
        Self {
            flavor,
            ports,
            stp: false,
        }
    }

    pub fn linux(ports: Vec<String>) -> Self {
        Self::new(BridgeFlavor::Linux, ports)
    }

    pub fn ovs(ports: Vec<String>) -> Self {
        Self::new(BridgeFlavor::Ovs, ports)
    }

    pub fn with_stp(mut self, enabled: bool) -> Self {
        self.stp = enabled;
        self
    }

    pub fn flavor(&self) -> BridgeFlavor {
        self.flavor
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn stp(&self) -> bool {
        self.stp
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
pub enum BondMode {
    #[strum(serialize = "balance-rr")]
    #[serde(rename = "balance-rr")]
    BalanceRr,
    #[default]
    #[strum(serialize = "active-backup")]
    #[serde(rename = "active-backup")]
    ActiveBackup,
    #[strum(serialize = "balance-xor")]
    #[serde(rename = "balance-xor")]
    BalanceXor,
    #[strum(serialize = "broadcast")]
    #[serde(rename = "broadcast")]
    Broadcast,
    #[strum(serialize = "802.3ad")]
    #[serde(rename = "802.3ad")]
    Lacp,
    #[strum(serialize = "balance-tlb")]
    #[serde(rename = "balance-tlb")]
    BalanceTlb,
    #[strum(serialize = "balance-alb")]
    #[serde(rename = "balance-alb")]
    BalanceAlb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondConfig {
    pub mode: BondMode,
    pub slaves: Vec<String>,
    pub miimon: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanConfig {
    pub base_iface: String,
    pub id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VxlanConfig {
    pub id: u32,
    pub base_iface: String,
    pub remote: IpAddr,
    pub destination_port: u16,
}

/// Type-specific payload of an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceConfig {
    Ethernet,
    Bridge(BridgeConfig),
    Bond(BondConfig),
    Vlan(VlanConfig),
    Vxlan(VxlanConfig),
}

impl InterfaceConfig {
    pub fn iface_type(&self) -> InterfaceType {
        match self {
            InterfaceConfig::Ethernet => InterfaceType::Ethernet,
            InterfaceConfig::Bridge(b) => match b.flavor {
                BridgeFlavor::Linux => InterfaceType::LinuxBridge,
                BridgeFlavor::Ovs => InterfaceType::OvsBridge,
            },
            InterfaceConfig::Bond(_) => InterfaceType::Bond,
            InterfaceConfig::Vlan(_) => InterfaceType::Vlan,
            InterfaceConfig::Vxlan(_) => InterfaceType::Vxlan,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Address {
    pub ip: Ipv4Addr,
    pub prefix_length: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ipv4Config {
    Disabled,
    Dhcp,
    Static(Vec<Ipv4Address>),
}

/// One entry of `desiredState.interfaces`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub name: String,
    pub state: InterfaceState,
    pub mtu: Option<u32>,
    pub ipv4: Option<Ipv4Config>,
    pub config: InterfaceConfig,
}

impl InterfaceSpec {
    pub fn new(name: impl Into<String>, config: InterfaceConfig) -> Self {
        Self {
            name: name.into(),
            state: InterfaceState::Up,
            mtu: None,
            ipv4: None,
            config,
        }
    }

    pub fn ethernet(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceConfig::Ethernet)
    }

    pub fn with_state(mut self, state: InterfaceState) -> Self {
        self.state = state;
        self
    }

    pub fn with_mtu(mut self, mtu: Option<u32>) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_ipv4(mut self, ipv4: Option<Ipv4Config>) -> Self {
        self.ipv4 = ipv4;
        self
    }

    pub fn iface_type(&self) -> InterfaceType {
        self.config.iface_type()
    }

    /// The same interface marked for removal
    pub fn absent(&self) -> Self {
        Self {
            state: InterfaceState::Absent,
            ..self.clone()
        }
    }
}

/// Reject names the kernel would refuse
pub fn validate_interface_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::invalid_state("interface name must not be empty"));
    }
    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(AppError::InvalidState(format!(
            "interface name {} is longer than {} characters",
            name, MAX_INTERFACE_NAME_LEN
        )));
    }
    if name.contains(|c: char| c == '/' || c.is_whitespace()) {
        return Err(AppError::InvalidState(format!(
            "interface name {:?} contains invalid characters",
            name
        )));
    }
    Ok(())
}

// Wire representation, field names as nmstate expects them.

#[derive(Serialize)]
struct WireInterface<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    iface_type: InterfaceType,
    state: InterfaceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    mtu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv4: Option<WireIpv4>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bridge: Option<WireBridge<'a>>,
    #[serde(rename = "link-aggregation", skip_serializing_if = "Option::is_none")]
    link_aggregation: Option<WireBond<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vlan: Option<WireVlan<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vxlan: Option<WireVxlan<'a>>,
}

#[derive(Serialize)]
struct WireIpv4 {
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    dhcp: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    address: Vec<WireAddress>,
}

#[derive(Serialize)]
struct WireAddress {
    ip: String,
    #[serde(rename = "prefix-length")]
    prefix_length: u8,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireStp {
    Linux { enabled: bool },
    Ovs(bool),
}

#[derive(Serialize)]
struct WireBridgeOptions {
    stp: WireStp,
}

#[derive(Serialize)]
struct WirePort<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct WireBridge<'a> {
    options: WireBridgeOptions,
    port: Vec<WirePort<'a>>,
}

#[derive(Serialize)]
struct WireBondOptions {
    miimon: u32,
}

#[derive(Serialize)]
struct WireBond<'a> {
    mode: BondMode,
    slaves: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireBondOptions>,
}

#[derive(Serialize)]
struct WireVlan<'a> {
    #[serde(rename = "base-iface")]
    base_iface: &'a str,
    id: u16,
}

#[derive(Serialize)]
struct WireVxlan<'a> {
    id: u32,
    #[serde(rename = "base-iface")]
    base_iface: &'a str,
    remote: String,
    #[serde(rename = "destination-port")]
    destination_port: u16,
}

impl From<&Ipv4Config> for WireIpv4 {
    fn from(config: &Ipv4Config) -> Self {
        match config {
            Ipv4Config::Disabled => WireIpv4 {
                enabled: false,
                dhcp: None,
                address: Vec::new(),
            },
            Ipv4Config::Dhcp => WireIpv4 {
                enabled: true,
                dhcp: Some(true),
                address: Vec::new(),
            },
            Ipv4Config::Static(addresses) => WireIpv4 {
                enabled: true,
                dhcp: Some(false),
                address: addresses
                    .iter()
                    .map(|a| WireAddress {
                        ip: a.ip.to_string(),
                        prefix_length: a.prefix_length,
                    })
                    .collect(),
            },
        }
    }
}

impl InterfaceSpec {
    fn to_wire(&self) -> WireInterface<'_> {
        let mut wire = WireInterface {
            name: &self.name,
            iface_type: self.iface_type(),
            state: self.state,
            mtu: None,
            ipv4: None,
            bridge: None,
            link_aggregation: None,
            vlan: None,
            vxlan: None,
        };

        // nmstate only needs name and type to remove an interface
        if self.state == InterfaceState::Absent {
            return wire;
        }

        wire.mtu = self.mtu;
        wire.ipv4 = self.ipv4.as_ref().map(WireIpv4::from);
        match &self.config {
            InterfaceConfig::Ethernet => {}
            InterfaceConfig::Bridge(b) => {
                let stp = match b.flavor {
                    BridgeFlavor::Linux => WireStp::Linux { enabled: b.stp },
                    BridgeFlavor::Ovs => WireStp::Ovs(b.stp),
                };
                wire.bridge = Some(WireBridge {
                    options: WireBridgeOptions { stp },
                    port: b.ports.iter().map(|p| WirePort { name: p }).collect(),
                });
            }
            InterfaceConfig::Bond(b) => {
                wire.link_aggregation = Some(WireBond {
                    mode: b.mode,
                    slaves: &b.slaves,
                    options: b.miimon.map(|miimon| WireBondOptions { miimon }),
                });
            }
            InterfaceConfig::Vlan(v) => {
                wire.vlan = Some(WireVlan {
                    base_iface: &v.base_iface,
                    id: v.id,
                });
            }
            InterfaceConfig::Vxlan(v) => {
                wire.vxlan = Some(WireVxlan {
                    id: v.id,
                    base_iface: &v.base_iface,
                    remote: v.remote.to_string(),
                    destination_port: v.destination_port,
                });
            }
        }
        wire
    }
}

impl Serialize for InterfaceSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_linux_bridge_wire_format() {
        let spec = InterfaceSpec::new(
            "br1",
            InterfaceConfig::Bridge(BridgeConfig::linux(vec!["eth1".to_string()])),
        );
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({
                "name": "br1",
                "type": "linux-bridge",
                "state": "up",
                "bridge": {
                    "options": {"stp": {"enabled": false}},
                    "port": [{"name": "eth1"}]
                }
            })
        );
    }

    #[test]
    fn test_ovs_bridge_stp_is_a_flag() {
        let spec = InterfaceSpec::new(
            "br-ovs",
            InterfaceConfig::Bridge(BridgeConfig::ovs(vec!["eth2".to_string()]).with_stp(true)),
        );
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "ovs-bridge");
        assert_eq!(value["bridge"]["options"]["stp"], true);
    }

    #[test]
    fn test_bond_wire_format() {
        let spec = InterfaceSpec::new(
            "bond0",
            InterfaceConfig::Bond(BondConfig {
                mode: BondMode::Lacp,
                slaves: vec!["eth1".to_string(), "eth2".to_string()],
                miimon: Some(120),
            }),
        )
        .with_mtu(Some(1450));
        let value = serde_json::to_value(&spec).unwrap();

        assert_eq!(value["type"], "bond");
        assert_eq!(value["mtu"], 1450);
        assert_eq!(value["link-aggregation"]["mode"], "802.3ad");
        assert_eq!(value["link-aggregation"]["slaves"], json!(["eth1", "eth2"]));
        assert_eq!(value["link-aggregation"]["options"]["miimon"], 120);
    }

    #[test]
    fn test_vlan_and_vxlan_wire_format() {
        let vlan = InterfaceSpec::new(
            "eth1.100",
            InterfaceConfig::Vlan(VlanConfig {
                base_iface: "eth1".to_string(),
                id: 100,
            }),
        );
        let value = serde_json::to_value(&vlan).unwrap();
        assert_eq!(value["vlan"], json!({"base-iface": "eth1", "id": 100}));

        let vxlan = InterfaceSpec::new(
            "vxlan10",
            InterfaceConfig::Vxlan(VxlanConfig {
                id: 10,
                base_iface: "eth0".to_string(),
                remote: "192.0.2.10".parse().unwrap(),
                destination_port: DEFAULT_VXLAN_PORT,
            }),
        );
        let value = serde_json::to_value(&vxlan).unwrap();
        assert_eq!(
            value["vxlan"],
            json!({"id": 10, "base-iface": "eth0", "remote": "192.0.2.10", "destination-port": 4789})
        );
    }

    #[test]
    fn test_absent_keeps_only_identity() {
        let spec = InterfaceSpec::ethernet("eth1")
            .with_mtu(Some(9000))
            .with_ipv4(Some(Ipv4Config::Dhcp));
        let value = serde_json::to_value(spec.absent()).unwrap();
        assert_eq!(value, json!({"name": "eth1", "type": "ethernet", "state": "absent"}));
    }

    #[test]
    fn test_ipv4_static() {
        let spec = InterfaceSpec::ethernet("eth1").with_ipv4(Some(Ipv4Config::Static(vec![
            Ipv4Address {
                ip: Ipv4Addr::new(10, 200, 0, 1),
                prefix_length: 24,
            },
        ])));
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value["ipv4"],
            json!({"enabled": true, "dhcp": false, "address": [{"ip": "10.200.0.1", "prefix-length": 24}]})
        );
    }

    #[test]
    fn test_interface_name_validation() {
        assert!(validate_interface_name("eth1").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("a-very-long-bridge-name").is_err());
        assert!(validate_interface_name("br 1").is_err());
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("up".parse::<InterfaceState>().unwrap(), InterfaceState::Up);
        assert_eq!(InterfaceType::LinuxBridge.to_string(), "linux-bridge");
        assert_eq!(BondMode::Lacp.as_ref(), "802.3ad");
    }
}
