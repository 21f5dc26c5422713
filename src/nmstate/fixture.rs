//! Deploy/teardown helpers around network policies
//!
//! A [`PolicyFixture`] owns one policy for the duration of a test: it creates
//! the policy and waits for the controller to report it Available, and on
//! clean-up first asks nmstate to remove every interface the policy created
//! before deleting the policy object itself.

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use super::interface::{InterfaceSpec, InterfaceState};
use super::node_state::wait_for_interface_state;
use super::policy::{BridgePolicy, NodeNetworkConfigurationPolicy, PolicyStatus, StatusExpectation, VxlanPolicy};
use crate::config::Timeouts;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::k8s::{generation, ClusterApi, ResourceKind, ResourceRef};
use crate::lifecycle::{LifecycleState, ManagedResource};
use crate::nodes::{wait_on_nodes, NodeOutcome};
use crate::sampler::TimeoutSampler;

/// Name of the per-node enactment nmstate creates for a policy
pub fn enactment_name(node: &str, policy: &str) -> String {
    format!("{}.{}", node, policy)
}

pub struct PolicyFixture<'c, C> {
    inner: ManagedResource<'c, C, NodeNetworkConfigurationPolicy>,
    expected: StatusExpectation,
}

impl<'c, C: ClusterApi> PolicyFixture<'c, C> {
    pub fn new(cluster: &'c C, policy: NodeNetworkConfigurationPolicy, timeouts: Timeouts) -> Self {
        Self {
            inner: ManagedResource::new(cluster, policy, timeouts),
            expected: StatusExpectation::default(),
        }
    }

    /// Whether clean_up() removes the interfaces and the policy
    pub fn teardown(mut self, teardown: bool) -> Self {
        self.inner = self.inner.teardown(teardown);
        self
    }

    pub fn policy(&self) -> &NodeNetworkConfigurationPolicy {
        self.inner.resource()
    }

    pub fn name(&self) -> &str {
        self.inner.resource().name()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    pub fn target(&self) -> &ResourceRef {
        self.inner.target()
    }

    /// Create the policy and wait for it to become Available
    #[instrument(skip_all, fields(policy = %self.name()))]
    pub async fn deploy(&mut self) -> AppResult<Value> {
        let created = self.inner.enter().await?;
        self.expected = StatusExpectation::for_generation(generation(&created));
        self.wait_for_success().await
    }

    /// Take over an existing policy of the same name
    pub async fn adopt(&mut self) -> AppResult<Value> {
        let current = self.inner.adopt().await?;
        self.expected = StatusExpectation::for_generation(generation(&current));
        Ok(current)
    }

    /// Replace (or add) an interface and push the new desired state
    pub async fn set_interface(&mut self, spec: InterfaceSpec) -> AppResult<Value> {
        self.inner.resource_mut().set_interface(spec);
        self.apply().await
    }

    /// Push the current desired state and wait for it to be enacted
    pub async fn apply(&mut self) -> AppResult<Value> {
        let sent_at = Utc::now();
        let updated = self.inner.update_resource().await?;
        let written = generation(&updated);
        self.expected = if written.is_some() && written == self.expected.generation {
            // Same spec as before: the current status already describes it
            StatusExpectation::for_generation(written)
        } else {
            StatusExpectation::after_write(written, sent_at)
        };
        self.wait_for_success().await
    }

    /// Wait for the controller to report the last written desired state
    /// `Available=True`; `Degraded=True` for it fails immediately. Conditions
    /// left over from an earlier generation are ignored.
    pub async fn wait_for_success(&mut self) -> AppResult<Value> {
        let mut degraded = None;
        let expected = self.expected;
        let timeout = self.inner.timeouts().policy;
        let observed = self
            .inner
            .wait_for_condition(
                "to be Available",
                |object| {
                    let status = PolicyStatus::from_object(object);
                    if let Some(message) = status.degraded_message() {
                        if status.reflects(&expected, "Degraded") {
                            degraded = Some(message);
                            return true;
                        }
                    }
                    status.is_available() && status.reflects(&expected, "Available")
                },
                timeout,
            )
            .await?;

        if let Some(message) = degraded {
            error!(policy = %self.name(), %message, "Policy failed to configure");
            return Err(AppError::PolicyDegraded {
                policy: self.name().to_string(),
                message,
            });
        }
        info!(policy = %self.name(), generation = ?expected.generation, "Policy available");
        Ok(observed)
    }

    /// Wait for every node's enactment of this policy to become Available.
    ///
    /// Nodes are observed concurrently and each reports its own outcome.
    pub async fn wait_for_enactments(&self, nodes: &[String]) -> Vec<NodeOutcome<Value>> {
        let cluster = self.inner.cluster();
        let policy = self.name().to_string();
        let timeouts = *self.inner.timeouts();

        wait_on_nodes(nodes.iter().cloned(), |node| {
            let target = ResourceRef::cluster_scoped(
                ResourceKind::NODE_NETWORK_CONFIGURATION_ENACTMENT,
                enactment_name(&node, &policy),
            );
            async move {
                let target = &target;
                TimeoutSampler::new(timeouts.policy, timeouts.sample_interval, move || cluster.get(target))
                    .describe(format!("{} to be Available", target))
                    .tolerate(ErrorKind::NotFound)
                    .wait_for(|object| PolicyStatus::from_object(object).is_available())
                    .await
            }
        })
        .await
    }

    /// Remove the policy's interfaces, then the policy.
    ///
    /// A failure while removing interfaces is logged and the policy is deleted
    /// anyway. Only a rejected delete request is returned.
    #[instrument(skip_all, fields(policy = %self.name()))]
    pub async fn clean_up(&mut self) -> AppResult<()> {
        let live = matches!(self.state(), LifecycleState::Created | LifecycleState::Active);
        if live && self.inner.handle().teardown() {
            self.inner.resource_mut().mark_absent();
            if let Err(e) = self.apply().await {
                warn!(error = %e, "Failed to remove policy interfaces, deleting the policy anyway");
            }
        }
        self.inner.exit().await
    }
}

/// A bridge whose only port is a VXLAN tunnel, on one node.
///
/// The VXLAN policy goes first and the node must report the tunnel up before
/// the bridge is created. Teardown removes the bridge first.
pub struct VxlanBridge<'c, C> {
    cluster: &'c C,
    node: String,
    vxlan_iface: String,
    timeouts: Timeouts,
    vxlan: PolicyFixture<'c, C>,
    bridge: Option<PolicyFixture<'c, C>>,
    bridge_policy: Option<BridgePolicy>,
}

impl<'c, C: ClusterApi> VxlanBridge<'c, C> {
    /// `bridge` must not list any port: the VXLAN interface is added as the
    /// only one.
    pub fn new(
        cluster: &'c C,
        vxlan: VxlanPolicy,
        bridge: BridgePolicy,
        timeouts: Timeouts,
    ) -> AppResult<Self> {
        let node = vxlan
            .node_name()
            .ok_or_else(|| AppError::invalid_state("a VXLAN bridge needs a node selector"))?
            .to_string();
        if !bridge.port_names().is_empty() {
            return Err(AppError::InvalidState(format!(
                "bridge {} of a VXLAN bridge must not have ports of its own",
                bridge.bridge_name()
            )));
        }
        let vxlan_iface = vxlan.iface_name().to_string();
        let bridge = bridge.port(vxlan_iface.as_str()).node(node.as_str());
        let vxlan = PolicyFixture::new(cluster, vxlan.build()?, timeouts);

        Ok(Self {
            cluster,
            node,
            vxlan_iface,
            timeouts,
            vxlan,
            bridge: None,
            bridge_policy: Some(bridge),
        })
    }

    pub fn vxlan(&self) -> &PolicyFixture<'c, C> {
        &self.vxlan
    }

    pub fn bridge(&self) -> Option<&PolicyFixture<'c, C>> {
        self.bridge.as_ref()
    }

    /// Deploy the VXLAN policy, wait for the tunnel to come up, then deploy
    /// the bridge. After a failed attempt, calling it again resumes from the
    /// step that failed.
    pub async fn deploy(&mut self) -> AppResult<()> {
        if self.bridge_policy.is_none() {
            return Err(AppError::invalid_state("VXLAN bridge already deployed"));
        }

        match self.vxlan.state() {
            LifecycleState::Pending => {
                self.vxlan.deploy().await?;
            }
            LifecycleState::Created => {
                self.vxlan.wait_for_success().await?;
            }
            _ => {}
        }
        wait_for_interface_state(
            self.cluster,
            &self.node,
            &self.vxlan_iface,
            InterfaceState::Up,
            self.timeouts.resource,
            self.timeouts.sample_interval,
        )
        .await?;

        let bridge_policy = self
            .bridge_policy
            .take()
            .ok_or_else(|| AppError::invalid_state("VXLAN bridge already deployed"))?;
        let mut bridge = PolicyFixture::new(self.cluster, bridge_policy.build()?, self.timeouts);
        let deployed = bridge.deploy().await;
        // Keep the fixture even on failure so clean_up() can delete it
        self.bridge = Some(bridge);
        deployed.map(|_| ())
    }

    /// Tear down the bridge, then the VXLAN. Both are always attempted;
    /// the first error is returned.
    pub async fn clean_up(&mut self) -> AppResult<()> {
        let bridge_result = match self.bridge.as_mut() {
            Some(bridge) => bridge.clean_up().await,
            None => Ok(()),
        };
        if let Err(e) = &bridge_result {
            error!(node = %self.node, error = %e, "Failed to clean up VXLAN bridge");
        }
        let vxlan_result = self.vxlan.clean_up().await;
        bridge_result.and(vxlan_result)
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}
