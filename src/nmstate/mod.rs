//! nmstate desired-state documents and network policy fixtures
//!
//! - `interface` / `desired_state`: the interface list a policy asks for
//! - `policy`: typed builders for bridge, bond, VLAN and VXLAN policies
//! - `fixture`: deploy, converge and tear down policies on a cluster
//! - `node_state`: what each node actually reports
//! - `manifest`: YAML lists of policy requests

pub mod desired_state;
pub mod fixture;
pub mod interface;
pub mod manifest;
pub mod node_state;
pub mod policy;

pub use desired_state::DesiredState;
pub use fixture::{enactment_name, PolicyFixture, VxlanBridge};
pub use interface::{
    BondConfig, BondMode, BridgeConfig, BridgeFlavor, InterfaceConfig, InterfaceSpec, InterfaceState, InterfaceType,
    Ipv4Address, Ipv4Config, VlanConfig, VxlanConfig,
};
pub use manifest::{parse_manifest, PolicyRequest};
pub use node_state::{wait_for_interface_state, wait_for_ipv4_address, NodeNetworkState, ObservedInterface};
pub use policy::{
    BondPolicy, BridgePolicy, NodeNetworkConfigurationPolicy, PolicyStatus, StatusExpectation, VlanPolicy, VxlanPolicy,
};
