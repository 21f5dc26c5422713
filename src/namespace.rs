//! Test namespaces
//!
//! Namespaces are the resource most often stuck in `Terminating`, so when a
//! corrective script is configured they get a [`DeletionNudger`](crate::nudge::DeletionNudger).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace as NamespaceObject;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::k8s::{managed_labels, ClusterApi, ClusterResource, ResourceKind, ResourceRef};
use crate::lifecycle::ManagedResource;
use crate::nudge::ScriptAction;

/// Generated names are trimmed to the DNS label limit
const MAX_NAME_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
    labels: BTreeMap<String, String>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: managed_labels(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// `<prefix>-<8 hex chars>`, unique per call
pub fn unique_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let prefix: String = prefix
        .trim_end_matches('-')
        .chars()
        .take(MAX_NAME_LEN - 9)
        .collect();
    format!("{}-{}", prefix, &suffix[..8])
}

impl ClusterResource for Namespace {
    fn target(&self) -> ResourceRef {
        ResourceRef::cluster_scoped(ResourceKind::NAMESPACE, &self.name)
    }

    fn to_body(&self) -> AppResult<Value> {
        let object = NamespaceObject {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(serde_json::to_value(&object)?)
    }
}

pub fn is_active(object: &Value) -> bool {
    object["status"]["phase"] == "Active"
}

/// A namespace owned by the calling scope, nudged when deletion stalls and a
/// corrective script is configured
pub type ManagedNamespace<'c, C> = ManagedResource<'c, C, Namespace, Option<ScriptAction>>;

pub fn managed_namespace<'c, C: ClusterApi>(
    cluster: &'c C,
    namespace: Namespace,
    config: &Config,
) -> ManagedNamespace<'c, C> {
    let resource = ManagedResource::new(cluster, namespace, config.timeouts());
    match &config.nudge_script {
        Some(script) => resource.with_nudger(config.nudge_settings(), Some(ScriptAction::new(script))),
        None => resource.with_action(None),
    }
}

impl<C: ClusterApi> ManagedNamespace<'_, C> {
    /// Create the namespace and wait for phase `Active`
    pub async fn create_and_wait(&mut self) -> AppResult<Value> {
        self.enter().await?;
        self.wait_for_active().await
    }

    pub async fn wait_for_active(&mut self) -> AppResult<Value> {
        let timeout = self.timeouts().resource;
        self.wait_for_condition("to be Active", is_active, timeout).await
    }
}
