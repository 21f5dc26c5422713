//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use netconverge::k8s::{InMemoryCluster, ResourceKind, ResourceRef};
use netconverge::Timeouts;
use serde_json::{json, Value};

pub fn timeouts() -> Timeouts {
    Timeouts {
        sample_interval: Duration::from_secs(1),
        resource: Duration::from_secs(10),
        delete: Duration::from_secs(60),
        conflict: Duration::from_secs(3),
        policy: Duration::from_secs(10),
    }
}

/// Bodies written to the cluster for network policies, in order
#[derive(Clone, Default)]
pub struct PolicyLog(Arc<Mutex<Vec<Value>>>);

impl PolicyLog {
    pub fn bodies(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Value {
        self.bodies().last().cloned().unwrap()
    }
}

fn interface_names(body: &Value) -> Vec<String> {
    body["spec"]["desiredState"]["interfaces"]
        .as_array()
        .map(|ifaces| {
            ifaces
                .iter()
                .filter_map(|i| i["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// A cluster whose fake nmstate controller marks every written policy
/// Available, except policies touching an interface named `fail*`, which
/// become Degraded. Every status reports the generation it was computed for.
pub fn nmstate_cluster() -> (InMemoryCluster, PolicyLog) {
    let log = PolicyLog::default();
    let recorder = log.clone();
    let cluster = InMemoryCluster::new().with_status_hook(move |target, body| {
        if target.kind != ResourceKind::NODE_NETWORK_CONFIGURATION_POLICY {
            return None;
        }
        recorder.0.lock().unwrap().push(body.clone());

        let failing = interface_names(body).iter().any(|n| n.starts_with("fail"));
        let observed = &body["metadata"]["generation"];
        Some(if failing {
            json!({"observedGeneration": observed, "conditions": [
                {"type": "Available", "status": "False"},
                {"type": "Degraded", "status": "True", "reason": "FailedToConfigure",
                 "message": "error reconciling NodeNetworkConfigurationPolicy on node worker-1"}
            ]})
        } else {
            json!({"observedGeneration": observed, "conditions": [
                {"type": "Available", "status": "True", "reason": "SuccessfullyConfigured"},
                {"type": "Degraded", "status": "False"}
            ]})
        })
    });
    (cluster, log)
}

/// NodeNetworkState document listing `interfaces` as `(name, type, state)`
pub fn node_state(node: &str, interfaces: &[(&str, &str, &str)]) -> Value {
    let interfaces: Vec<Value> = interfaces
        .iter()
        .map(|(name, type_, state)| json!({"name": name, "type": type_, "state": state}))
        .collect();
    json!({
        "apiVersion": "nmstate.io/v1beta1",
        "kind": "NodeNetworkState",
        "metadata": {"name": node},
        "status": {"currentState": {"interfaces": interfaces}}
    })
}

/// A cluster whose controller only reacts to creations: after a replace the
/// previous generation's status stays until [`catch_up`] runs.
pub fn lagging_nmstate_cluster() -> InMemoryCluster {
    InMemoryCluster::new().with_status_hook(|target, body| {
        let created = body.get("status").is_none();
        (target.kind == ResourceKind::NODE_NETWORK_CONFIGURATION_POLICY && created).then(|| available(body))
    })
}

/// Let the controller of a [`lagging_nmstate_cluster`] report the stored
/// generation of `target` Available
pub fn catch_up(cluster: &InMemoryCluster, target: &ResourceRef) {
    if let Some(object) = cluster.object(target) {
        cluster.set_status(target, available(&object));
    }
}

fn available(object: &Value) -> Value {
    json!({
        "observedGeneration": object["metadata"]["generation"],
        "conditions": [
            {"type": "Available", "status": "True", "reason": "SuccessfullyConfigured"},
            {"type": "Degraded", "status": "False"}
        ]
    })
}
