//! Resource identity for the cluster objects NetConverge drives
//!
//! Resources are addressed by kind, name and optional namespace, and handed
//! to the cluster as plain JSON documents.

use std::collections::BTreeMap;
use std::fmt;

use kube::discovery::ApiResource;
use serde_json::{json, Value};

use crate::error::AppResult;

/// Label marking every object created by this crate
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const MANAGED_BY_VALUE: &str = "netconverge";

/// Labels attached to every managed object
pub fn managed_labels() -> BTreeMap<String, String> {
    [(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]
        .into_iter()
        .collect()
}

/// A group/version/kind plus the REST plural and scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl ResourceKind {
    pub const NAMESPACE: ResourceKind = ResourceKind {
        group: "",
        version: "v1",
        kind: "Namespace",
        plural: "namespaces",
        namespaced: false,
    };

    pub const NODE_NETWORK_CONFIGURATION_POLICY: ResourceKind = ResourceKind {
        group: "nmstate.io",
        version: "v1",
        kind: "NodeNetworkConfigurationPolicy",
        plural: "nodenetworkconfigurationpolicies",
        namespaced: false,
    };

    pub const NODE_NETWORK_STATE: ResourceKind = ResourceKind {
        group: "nmstate.io",
        version: "v1beta1",
        kind: "NodeNetworkState",
        plural: "nodenetworkstates",
        namespaced: false,
    };

    pub const NODE_NETWORK_CONFIGURATION_ENACTMENT: ResourceKind = ResourceKind {
        group: "nmstate.io",
        version: "v1beta1",
        kind: "NodeNetworkConfigurationEnactment",
        plural: "nodenetworkconfigurationenactments",
        namespaced: false,
    };

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: self.api_version(),
            kind: self.kind.to_string(),
            plural: self.plural.to_string(),
        }
    }
}

/// Identity of one cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn cluster_scoped(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Skeleton document with apiVersion, kind and metadata filled in
    pub fn envelope(&self) -> Value {
        let mut metadata = json!({
            "name": self.name,
            "labels": managed_labels(),
        });
        if let Some(ns) = &self.namespace {
            metadata["namespace"] = json!(ns);
        }
        json!({
            "apiVersion": self.kind.api_version(),
            "kind": self.kind.kind,
            "metadata": metadata,
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind.kind, self.name),
        }
    }
}

/// Anything that can be submitted to the cluster as a single document
pub trait ClusterResource {
    fn target(&self) -> ResourceRef;

    fn to_body(&self) -> AppResult<Value>;
}

/// `metadata.resourceVersion` of a fetched object
pub fn resource_version(object: &Value) -> Option<&str> {
    object
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(|v| v.as_str())
}

/// `metadata.generation`, bumped by the API server on every spec change
pub fn generation(object: &Value) -> Option<i64> {
    object
        .get("metadata")
        .and_then(|m| m.get("generation"))
        .and_then(Value::as_i64)
}
