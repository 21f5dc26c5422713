//! Kubernetes integration module for NetConverge
//!
//! This module is the only place that talks to the API server:
//! - The narrow `ClusterApi` trait used by the lifecycle and polling code
//! - A kube-rs backed implementation and an in-memory one
//! - Resource identity (kind, name, namespace) and document envelopes

mod client;
pub mod memory;
mod resources;

pub use client::{ClusterApi, KubeCluster};
pub use memory::InMemoryCluster;
pub use resources::{
    generation, managed_labels, resource_version, ClusterResource, ResourceKind, ResourceRef, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE,
};
