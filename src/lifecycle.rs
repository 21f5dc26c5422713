//! Scoped acquisition of cluster resources
//!
//! A [`ManagedResource`] creates its object on [`enter`](ManagedResource::enter),
//! lets the caller wait for an observable condition, and deletes the object on
//! [`exit`](ManagedResource::exit). Exit is best effort: once the delete request
//! has been accepted, nothing that happens while waiting for the object to
//! disappear is returned to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use strum::Display;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Timeouts;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::k8s::{resource_version, ClusterApi, ClusterResource, ResourceRef};
use crate::nudge::{CorrectiveAction, DeletionNudger, NudgeSettings};
use crate::retry::retry_on_conflict;
use crate::sampler::TimeoutSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleState {
    /// Not submitted yet
    Pending,
    /// Accepted by the API server
    Created,
    /// Observed reaching the awaited condition
    Active,
    /// Delete accepted, disappearance not confirmed
    Deleting,
    Deleted,
    /// Still present when the deletion wait expired
    TimedOut,
    /// Left in the cluster on purpose
    Abandoned,
}

/// Ownership record of one cluster object
#[derive(Debug)]
pub struct ResourceHandle {
    target: ResourceRef,
    teardown: bool,
    state: LifecycleState,
    created_at: Option<DateTime<Utc>>,
    nudger: Option<DeletionNudger>,
}

impl ResourceHandle {
    fn new(target: ResourceRef) -> Self {
        Self {
            target,
            teardown: true,
            state: LifecycleState::Pending,
            created_at: None,
            nudger: None,
        }
    }

    pub fn target(&self) -> &ResourceRef {
        &self.target
    }

    pub fn teardown(&self) -> bool {
        self.teardown
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn nudger(&self) -> Option<&DeletionNudger> {
        self.nudger.as_ref()
    }

    fn owns_live_object(&self) -> bool {
        matches!(self.state, LifecycleState::Created | LifecycleState::Active)
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if self.teardown && self.owns_live_object() {
            error!(
                resource = %self.target,
                state = %self.state,
                "Resource dropped without exit(); it was left in the cluster"
            );
        }
    }
}

/// Placeholder corrective action for resources without a nudger
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNudge;

impl CorrectiveAction for NoNudge {
    async fn run(&self, _target: &ResourceRef) -> AppResult<()> {
        Ok(())
    }
}

/// A cluster resource bound to the scope that created it
pub struct ManagedResource<'c, C, R, A = NoNudge> {
    cluster: &'c C,
    resource: R,
    handle: ResourceHandle,
    timeouts: Timeouts,
    action: A,
}

impl<'c, C, R> ManagedResource<'c, C, R, NoNudge>
where
    C: ClusterApi,
    R: ClusterResource,
{
    pub fn new(cluster: &'c C, resource: R, timeouts: Timeouts) -> Self {
        let handle = ResourceHandle::new(resource.target());
        Self {
            cluster,
            resource,
            handle,
            timeouts,
            action: NoNudge,
        }
    }
}

impl<'c, C, R, A> ManagedResource<'c, C, R, A>
where
    C: ClusterApi,
    R: ClusterResource,
    A: CorrectiveAction,
{
    /// Whether exit() deletes the resource
    pub fn teardown(mut self, teardown: bool) -> Self {
        self.handle.teardown = teardown;
        self
    }

    /// Run `action` while a deletion is stuck, per `settings`
    pub fn with_nudger<B: CorrectiveAction>(
        self,
        settings: NudgeSettings,
        action: B,
    ) -> ManagedResource<'c, C, R, B> {
        let mut res = self.with_action(action);
        res.handle.nudger = Some(DeletionNudger::new(settings));
        res
    }

    /// Swap the corrective action, keeping the current nudger (if any)
    pub fn with_action<B: CorrectiveAction>(self, action: B) -> ManagedResource<'c, C, R, B> {
        ManagedResource {
            cluster: self.cluster,
            resource: self.resource,
            handle: self.handle,
            timeouts: self.timeouts,
            action,
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Mutable access for callers that recompute the document before `update`
    pub fn resource_mut(&mut self) -> &mut R {
        &mut self.resource
    }

    pub fn target(&self) -> &ResourceRef {
        &self.handle.target
    }

    pub fn state(&self) -> LifecycleState {
        self.handle.state
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn cluster(&self) -> &'c C {
        self.cluster
    }

    /// Give up ownership: exit() will leave the resource in place
    pub fn abandon(&mut self) {
        self.handle.teardown = false;
    }

    /// Submit the creation. An already existing object is an error.
    #[instrument(skip_all, fields(resource = %self.handle.target))]
    pub async fn enter(&mut self) -> AppResult<Value> {
        if self.handle.state != LifecycleState::Pending {
            return Err(AppError::InvalidState(format!(
                "{} cannot be created from state {}",
                self.handle.target, self.handle.state
            )));
        }

        let body = self.resource.to_body()?;
        let created = self.cluster.create(&self.handle.target, &body).await?;
        self.handle.state = LifecycleState::Created;
        self.handle.created_at = Some(Utc::now());
        info!("Resource created");
        Ok(created)
    }

    /// Take ownership of an object that already exists in the cluster
    pub async fn adopt(&mut self) -> AppResult<Value> {
        let current = self.cluster.get(&self.handle.target).await?;
        self.handle.state = LifecycleState::Created;
        self.handle.created_at = Some(creation_timestamp(&current).unwrap_or_else(Utc::now));
        debug!(resource = %self.handle.target, "Adopted existing resource");
        Ok(current)
    }

    pub async fn get(&self) -> AppResult<Value> {
        self.cluster.get(&self.handle.target).await
    }

    pub async fn exists(&self) -> AppResult<bool> {
        match self.cluster.get(&self.handle.target).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Replace the object with `body`, retrying on conflicts against the
    /// latest resource version.
    pub async fn update(&mut self, body: &Value) -> AppResult<Value> {
        self.ensure_submitted("update")?;

        let cluster = self.cluster;
        let target = &self.handle.target;
        let operation = format!("update {}", target);
        retry_on_conflict(&operation, self.timeouts.conflict, move || {
            let mut body = body.clone();
            async move {
                let current = cluster.get(target).await?;
                if let Some(version) = resource_version(&current) {
                    body["metadata"]["resourceVersion"] = json!(version);
                }
                cluster.replace(target, &body).await
            }
        })
        .await
    }

    /// Push the current document of the wrapped resource
    pub async fn update_resource(&mut self) -> AppResult<Value> {
        let body = self.resource.to_body()?;
        self.update(&body).await
    }

    /// Poll the object until `predicate` accepts it.
    ///
    /// A missing object counts as "not converged yet". On timeout the error
    /// carries the last observed document.
    pub async fn wait_for_condition<P>(
        &mut self,
        description: &str,
        predicate: P,
        timeout: Duration,
    ) -> AppResult<Value>
    where
        P: FnMut(&Value) -> bool,
    {
        self.ensure_submitted("wait for a condition on")?;

        let cluster = self.cluster;
        let target = &self.handle.target;
        let observed = TimeoutSampler::new(timeout, self.timeouts.sample_interval, move || {
            cluster.get(target)
        })
        .describe(format!("{} {}", target, description))
        .tolerate(ErrorKind::NotFound)
        .wait_for(predicate)
        .await?;

        self.handle.state = LifecycleState::Active;
        debug!(resource = %self.handle.target, condition = %description, "Condition reached");
        Ok(observed)
    }

    /// Release the resource.
    ///
    /// Deletes the object when teardown is enabled and waits for it to
    /// disappear, nudging stuck deletions. Only a failed delete request is
    /// returned; a missing object counts as deleted and every error while
    /// waiting is logged and swallowed.
    #[instrument(skip_all, fields(resource = %self.handle.target))]
    pub async fn exit(&mut self) -> AppResult<()> {
        if !self.handle.owns_live_object() {
            return Ok(());
        }
        if !self.handle.teardown {
            self.handle.state = LifecycleState::Abandoned;
            info!("Teardown disabled, leaving resource in place");
            return Ok(());
        }

        match self.cluster.delete(&self.handle.target).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Resource already gone");
            }
            Err(e) => return Err(e),
        }
        self.handle.state = LifecycleState::Deleting;
        self.wait_for_deletion().await;
        Ok(())
    }

    async fn wait_for_deletion(&mut self) {
        let cluster = self.cluster;
        let target = self.handle.target.clone();
        let target_ref = &target;
        let mut sampler = TimeoutSampler::new(
            self.timeouts.delete,
            self.timeouts.sample_interval,
            move || cluster.get(target_ref),
        )
        .describe(format!("{} to be deleted", target));

        loop {
            match sampler.next_sample().await {
                Ok(_) => {
                    if let Some(nudger) = self.handle.nudger.as_mut() {
                        nudger.nudge(&self.action, &target).await;
                    }
                }
                Err(e) if e.is_not_found() => {
                    self.handle.state = LifecycleState::Deleted;
                    info!(resource = %target, "Resource deleted");
                    return;
                }
                Err(e @ AppError::Timeout { .. }) => {
                    self.handle.state = LifecycleState::TimedOut;
                    error!(resource = %target, error = %e, "Resource was not deleted in time");
                    return;
                }
                Err(e) => {
                    error!(resource = %target, error = %e, "Failed while waiting for deletion");
                    return;
                }
            }
        }
    }

    fn ensure_submitted(&self, action: &str) -> AppResult<()> {
        match self.handle.state {
            LifecycleState::Created | LifecycleState::Active => Ok(()),
            state => {
                warn!(resource = %self.handle.target, %state, "Operation on a resource that is not live");
                Err(AppError::InvalidState(format!(
                    "cannot {} {} in state {}",
                    action, self.handle.target, state
                )))
            }
        }
    }
}

fn creation_timestamp(object: &Value) -> Option<DateTime<Utc>> {
    object["metadata"]["creationTimestamp"]
        .as_str()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}
