//! Kubernetes client wrapper for NetConverge

use kube::{
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::resources::ResourceRef;
use crate::config::Config;
use crate::error::{AppError, AppResult};

/// The narrow RPC surface the lifecycle and polling code needs.
///
/// Errors are classified into [`AppError::NotFound`], [`AppError::Conflict`]
/// and [`AppError::AlreadyExists`] so callers can decide what to tolerate.
#[allow(async_fn_in_trait)]
pub trait ClusterApi {
    async fn get(&self, target: &ResourceRef) -> AppResult<Value>;

    async fn create(&self, target: &ResourceRef, body: &Value) -> AppResult<Value>;

    /// Full replace; fails with a conflict when `metadata.resourceVersion` is stale
    async fn replace(&self, target: &ResourceRef, body: &Value) -> AppResult<Value>;

    async fn patch_merge(&self, target: &ResourceRef, patch: &Value) -> AppResult<Value>;

    async fn delete(&self, target: &ResourceRef) -> AppResult<()>;
}

/// [`ClusterApi`] backed by a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using the configured kubeconfig, or infer in-cluster/default config
    #[instrument(skip_all)]
    pub async fn new(config: &Config) -> AppResult<Self> {
        let kube_config = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| AppError::Config(format!("Failed to read kubeconfig {}: {}", path, e)))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| AppError::Config(format!("Invalid kubeconfig {}: {}", path, e)))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| AppError::Config(format!("Failed to infer kube config: {}", e)))?,
        };
        let client = Client::try_from(kube_config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Check if cluster is reachable
    pub async fn health_check(&self) -> AppResult<bool> {
        let version = self.client.apiserver_version().await?;
        info!(version = %version.git_version, "Kubernetes cluster is healthy");
        Ok(true)
    }

    fn api(&self, target: &ResourceRef) -> Api<DynamicObject> {
        let ar = target.kind.api_resource();
        match &target.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_object(body: &Value) -> AppResult<DynamicObject> {
    Ok(serde_json::from_value(body.clone())?)
}

fn to_value(object: DynamicObject) -> AppResult<Value> {
    Ok(serde_json::to_value(object)?)
}

impl ClusterApi for KubeCluster {
    async fn get(&self, target: &ResourceRef) -> AppResult<Value> {
        let object = self.api(target).get(&target.name).await?;
        to_value(object)
    }

    #[instrument(skip(self, body), fields(resource = %target))]
    async fn create(&self, target: &ResourceRef, body: &Value) -> AppResult<Value> {
        let created = self
            .api(target)
            .create(&PostParams::default(), &to_object(body)?)
            .await?;
        info!("Created resource");
        to_value(created)
    }

    #[instrument(skip(self, body), fields(resource = %target))]
    async fn replace(&self, target: &ResourceRef, body: &Value) -> AppResult<Value> {
        let replaced = self
            .api(target)
            .replace(&target.name, &PostParams::default(), &to_object(body)?)
            .await?;
        debug!("Replaced resource");
        to_value(replaced)
    }

    #[instrument(skip(self, patch), fields(resource = %target))]
    async fn patch_merge(&self, target: &ResourceRef, patch: &Value) -> AppResult<Value> {
        let patched = self
            .api(target)
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        debug!("Patched resource");
        to_value(patched)
    }

    #[instrument(skip(self), fields(resource = %target))]
    async fn delete(&self, target: &ResourceRef) -> AppResult<()> {
        self.api(target)
            .delete(&target.name, &DeleteParams::default())
            .await?;
        info!("Delete requested");
        Ok(())
    }
}
