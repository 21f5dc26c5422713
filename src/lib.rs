//! NetConverge library
//!
//! Client-side building blocks for Kubernetes network tests: a timeout-bounded
//! poller, conflict-tolerant updates, scoped resource lifecycles with stuck
//! deletion handling, and nmstate desired-state policy builders.

pub mod config;
pub mod error;
pub mod k8s;
pub mod lifecycle;
pub mod namespace;
pub mod nmstate;
pub mod nodes;
pub mod nudge;
pub mod retry;
pub mod sampler;
pub mod telemetry;

pub use config::{Config, Timeouts};
pub use error::{AppError, AppResult, ErrorKind};
pub use lifecycle::{LifecycleState, ManagedResource};
pub use sampler::TimeoutSampler;
