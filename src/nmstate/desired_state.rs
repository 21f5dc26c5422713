//! Ordered list of interfaces a policy asks nmstate to converge to

use serde::Serialize;

use super::interface::InterfaceSpec;

/// `spec.desiredState` of a NodeNetworkConfigurationPolicy.
///
/// Interface names are unique. Order matters to nmstate: members must appear
/// before the interface that aggregates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    interfaces: Vec<InterfaceSpec>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the interface named `spec.name`.
    ///
    /// Any previous entry with that name is removed and the new one is
    /// appended, so a replaced interface moves to the end of the list.
    pub fn set_interface(&mut self, spec: InterfaceSpec) {
        self.interfaces.retain(|existing| existing.name != spec.name);
        self.interfaces.push(spec);
    }

    pub fn interfaces(&self) -> &[InterfaceSpec] {
        &self.interfaces
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceSpec> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.interfaces.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Mark every interface for removal, keeping the list order
    pub fn mark_absent(&mut self) {
        let current: Vec<InterfaceSpec> = self.interfaces.clone();
        for spec in current {
            self.set_interface(spec.absent());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmstate::interface::{InterfaceState, Ipv4Config};
    use serde_json::json;

    #[test]
    fn test_set_interface_is_idempotent() {
        let mut state = DesiredState::new();
        state.set_interface(InterfaceSpec::ethernet("eth1").with_mtu(Some(1450)));
        let once = state.clone();
        state.set_interface(InterfaceSpec::ethernet("eth1").with_mtu(Some(1450)));

        assert_eq!(state, once);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_replaced_interface_moves_to_end() {
        let mut state = DesiredState::new();
        state.set_interface(InterfaceSpec::ethernet("eth1"));
        state.set_interface(InterfaceSpec::ethernet("eth2"));
        state.set_interface(InterfaceSpec::ethernet("eth1").with_ipv4(Some(Ipv4Config::Dhcp)));

        assert_eq!(state.names(), vec!["eth2", "eth1"]);
        assert_eq!(state.interface("eth1").unwrap().ipv4, Some(Ipv4Config::Dhcp));
    }

    #[test]
    fn test_mark_absent_keeps_order() {
        let mut state = DesiredState::new();
        for name in ["eth1", "eth2", "bond0"] {
            state.set_interface(InterfaceSpec::ethernet(name));
        }
        state.mark_absent();

        assert_eq!(state.names(), vec!["eth1", "eth2", "bond0"]);
        assert!(state
            .interfaces()
            .iter()
            .all(|i| i.state == InterfaceState::Absent));
    }

    #[test]
    fn test_serializes_as_interfaces_list() {
        let mut state = DesiredState::new();
        state.set_interface(InterfaceSpec::ethernet("eth1"));
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"interfaces": [{"name": "eth1", "type": "ethernet", "state": "up"}]})
        );
    }
}
