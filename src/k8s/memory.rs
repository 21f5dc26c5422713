//! In-memory [`ClusterApi`] for offline runs and tests
//!
//! Objects carrying `metadata.finalizers` are not removed by `delete`: they
//! get a `deletionTimestamp` and stay until their finalizers are cleared
//! with a merge patch, which is how stuck deletions are reproduced.
//!
//! `status` behaves like a subresource: a replace keeps the stored status
//! unless the status hook writes a new one, and `metadata.generation` only
//! moves when `spec` changes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};

use super::client::ClusterApi;
use super::resources::{generation, resource_version, ResourceRef};
use crate::error::{AppError, AppResult};

/// Cluster operation a scripted failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Replace,
    Patch,
    Delete,
}

/// Failure injected into the next call of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    Conflict,
    NotFound,
    AlreadyExists,
    Api(u16),
}

impl ScriptedFailure {
    fn to_error(&self, target: &ResourceRef) -> AppError {
        match self {
            ScriptedFailure::Conflict => AppError::Conflict(format!(
                "Operation cannot be fulfilled on {}: the object has been modified",
                target
            )),
            ScriptedFailure::NotFound => AppError::NotFound(format!("{} not found", target)),
            ScriptedFailure::AlreadyExists => AppError::AlreadyExists(format!("{} already exists", target)),
            ScriptedFailure::Api(code) => AppError::Api {
                code: *code,
                reason: "InternalError".to_string(),
                message: format!("scripted failure on {}", target),
            },
        }
    }
}

type StatusHook = Box<dyn Fn(&ResourceRef, &Value) -> Option<Value> + Send + Sync>;

#[derive(Default)]
struct State {
    objects: BTreeMap<ResourceRef, Value>,
    failures: VecDeque<(Operation, ScriptedFailure)>,
    calls: Vec<(Operation, String)>,
    next_version: u64,
}

/// Shared, cloneable in-memory object store
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
    status_hook: Arc<Mutex<Option<StatusHook>>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute `status` for every created or replaced object, like a
    /// controller that reacts at once. Returning `None` keeps the stored
    /// status. The hook must not call back into the cluster.
    pub fn with_status_hook<H>(self, hook: H) -> Self
    where
        H: Fn(&ResourceRef, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        *self.lock_hook() = Some(Box::new(hook));
        self
    }

    /// Fail the next `op` call with `failure`; failures are consumed in order
    pub fn fail_next(&self, op: Operation, failure: ScriptedFailure) {
        self.lock().failures.push_back((op, failure));
    }

    /// Store an object directly, bypassing hooks and scripted failures
    pub fn insert(&self, target: &ResourceRef, object: Value) {
        let mut state = self.lock();
        let object = stamp(&mut state, target, object);
        state.objects.insert(target.clone(), object);
    }

    pub fn object(&self, target: &ResourceRef) -> Option<Value> {
        self.lock().objects.get(target).cloned()
    }

    pub fn contains(&self, target: &ResourceRef) -> bool {
        self.lock().objects.contains_key(target)
    }

    /// Overwrite the `status` of a stored object
    pub fn set_status(&self, target: &ResourceRef, status: Value) {
        if let Some(object) = self.lock().objects.get_mut(target) {
            object["status"] = status;
        }
    }

    /// Every call made so far, as `(operation, resource)` pairs
    pub fn calls(&self) -> Vec<(Operation, String)> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, op: Operation) -> usize {
        self.lock().calls.iter().filter(|(o, _)| *o == op).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_hook(&self) -> std::sync::MutexGuard<'_, Option<StatusHook>> {
        self.status_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and pop a matching scripted failure, if any
    fn begin(&self, op: Operation, target: &ResourceRef) -> AppResult<()> {
        let mut state = self.lock();
        state.calls.push((op, target.to_string()));
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, failure)) = state.failures.remove(pos) {
                return Err(failure.to_error(target));
            }
        }
        Ok(())
    }

    fn apply_hook(&self, target: &ResourceRef, object: &mut Value) {
        if let Some(hook) = self.lock_hook().as_ref() {
            if let Some(status) = hook(target, object) {
                object["status"] = status;
            }
        }
    }
}

fn stamp(state: &mut State, target: &ResourceRef, mut object: Value) -> Value {
    state.next_version += 1;
    if !object.get("metadata").is_some_and(Value::is_object) {
        object["metadata"] = json!({});
    }
    object["metadata"]["name"] = json!(target.name);
    object["metadata"]["resourceVersion"] = json!(state.next_version.to_string());
    if object["metadata"]["generation"].is_null() {
        object["metadata"]["generation"] = json!(1);
    }
    if object["metadata"]["creationTimestamp"].is_null() {
        object["metadata"]["creationTimestamp"] = json!(Utc::now().to_rfc3339());
    }
    object
}

fn not_found(target: &ResourceRef) -> AppError {
    AppError::NotFound(format!("{} not found", target))
}

fn has_finalizers(object: &Value) -> bool {
    object["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

/// RFC 7386 merge of `patch` into `target`
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = json!({});
            }
            for (key, value) in entries {
                if value.is_null() {
                    if let Some(map) = target.as_object_mut() {
                        map.remove(key);
                    }
                } else {
                    merge(&mut target[key.as_str()], value);
                }
            }
        }
        other => *target = other.clone(),
    }
}

impl ClusterApi for InMemoryCluster {
    async fn get(&self, target: &ResourceRef) -> AppResult<Value> {
        self.begin(Operation::Get, target)?;
        self.object(target).ok_or_else(|| not_found(target))
    }

    async fn create(&self, target: &ResourceRef, body: &Value) -> AppResult<Value> {
        self.begin(Operation::Create, target)?;
        let mut state = self.lock();
        if state.objects.contains_key(target) {
            return Err(AppError::AlreadyExists(format!("{} already exists", target)));
        }

        let mut object = body.clone();
        if let Some(fields) = object.as_object_mut() {
            fields.remove("status");
        }
        object["metadata"]["generation"] = json!(1);
        self.apply_hook(target, &mut object);

        let object = stamp(&mut state, target, object);
        state.objects.insert(target.clone(), object.clone());
        Ok(object)
    }

    async fn replace(&self, target: &ResourceRef, body: &Value) -> AppResult<Value> {
        self.begin(Operation::Replace, target)?;
        let mut state = self.lock();
        let current = state.objects.get(target).ok_or_else(|| not_found(target))?;
        if let Some(expected) = resource_version(body) {
            if resource_version(current) != Some(expected) {
                return Err(AppError::Conflict(format!(
                    "Operation cannot be fulfilled on {}: the object has been modified",
                    target
                )));
            }
        }

        let mut next_generation = generation(current).unwrap_or(1);
        if current.get("spec") != body.get("spec") {
            next_generation += 1;
        }
        let mut object = body.clone();
        match current.get("status") {
            Some(status) => object["status"] = status.clone(),
            None => {
                if let Some(fields) = object.as_object_mut() {
                    fields.remove("status");
                }
            }
        }
        object["metadata"]["generation"] = json!(next_generation);
        self.apply_hook(target, &mut object);

        let object = stamp(&mut state, target, object);
        state.objects.insert(target.clone(), object.clone());
        Ok(object)
    }

    async fn patch_merge(&self, target: &ResourceRef, patch: &Value) -> AppResult<Value> {
        self.begin(Operation::Patch, target)?;
        let mut state = self.lock();
        let mut object = state.objects.get(target).cloned().ok_or_else(|| not_found(target))?;
        merge(&mut object, patch);

        let terminating = !object["metadata"]["deletionTimestamp"].is_null();
        if terminating && !has_finalizers(&object) {
            state.objects.remove(target);
            return Ok(object);
        }
        let object = stamp(&mut state, target, object);
        state.objects.insert(target.clone(), object.clone());
        Ok(object)
    }

    async fn delete(&self, target: &ResourceRef) -> AppResult<()> {
        self.begin(Operation::Delete, target)?;
        let mut state = self.lock();
        let object = state.objects.get_mut(target).ok_or_else(|| not_found(target))?;
        if has_finalizers(object) {
            object["metadata"]["deletionTimestamp"] = json!(Utc::now().to_rfc3339());
        } else {
            state.objects.remove(target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::k8s::resources::ResourceKind;

    fn ns(name: &str) -> ResourceRef {
        ResourceRef::cluster_scoped(ResourceKind::NAMESPACE, name)
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let cluster = InMemoryCluster::new();
        let target = ns("ns1");

        cluster.create(&target, &target.envelope()).await.unwrap();
        let err = cluster.create(&target, &target.envelope()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let object = cluster.get(&target).await.unwrap();
        assert_eq!(object["metadata"]["name"], "ns1");

        cluster.delete(&target).await.unwrap();
        assert_eq!(cluster.get(&target).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let cluster = InMemoryCluster::new();
        let target = ns("ns1");
        let created = cluster.create(&target, &target.envelope()).await.unwrap();

        cluster.replace(&target, &created).await.unwrap();
        let err = cluster.replace(&target, &created).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_replace_keeps_status_and_bumps_generation_on_spec_change() {
        let cluster = InMemoryCluster::new();
        let target = ns("ns1");
        let mut body = target.envelope();
        body["spec"] = json!({"finalizers": ["kubernetes"]});
        let created = cluster.create(&target, &body).await.unwrap();
        assert_eq!(generation(&created), Some(1));
        cluster.set_status(&target, json!({"phase": "Active"}));

        let relabelled = cluster.replace(&target, &body).await.unwrap();
        assert_eq!(generation(&relabelled), Some(1));
        assert_eq!(relabelled["status"]["phase"], "Active");

        body["spec"] = json!({});
        let changed = cluster.replace(&target, &body).await.unwrap();
        assert_eq!(generation(&changed), Some(2));
        assert_eq!(changed["status"]["phase"], "Active");
    }

    #[tokio::test]
    async fn test_finalizers_block_deletion_until_cleared() {
        let cluster = InMemoryCluster::new();
        let target = ns("stuck");
        let mut body = target.envelope();
        body["metadata"]["finalizers"] = json!(["kubernetes"]);
        cluster.create(&target, &body).await.unwrap();

        cluster.delete(&target).await.unwrap();
        assert!(cluster.contains(&target));

        cluster
            .patch_merge(&target, &json!({"metadata": {"finalizers": null}}))
            .await
            .unwrap();
        assert!(!cluster.contains(&target));
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let cluster = InMemoryCluster::new();
        let target = ns("ns1");
        cluster.fail_next(Operation::Get, ScriptedFailure::Api(500));

        assert_eq!(cluster.get(&target).await.unwrap_err().kind(), ErrorKind::Api);
        assert_eq!(cluster.get(&target).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(cluster.count_calls(Operation::Get), 2);
    }

    #[test]
    fn test_merge_removes_null_keys() {
        let mut object = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge(&mut object, &json!({"a": null, "b": {"c": 5}}));
        assert_eq!(object, json!({"b": {"c": 5, "d": 3}}));
    }
}
