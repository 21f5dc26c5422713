//! Concurrent convergence checks across nodes
//!
//! Each node gets its own future (usually a Poller with its own timeout). All
//! of them run to completion: one node failing does not cancel the others.

use std::future::Future;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::AppResult;

/// Terminal result of the check for one node
#[derive(Debug)]
pub struct NodeOutcome<T> {
    pub node: String,
    pub result: AppResult<T>,
}

impl<T> NodeOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `check` for every node concurrently and collect every outcome, in
/// the order the nodes were given.
pub async fn wait_on_nodes<I, S, F, Fut, T>(nodes: I, check: F) -> Vec<NodeOutcome<T>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let checks = nodes.into_iter().map(|node| {
        let node: String = node.into();
        let fut = check(node.clone());
        async move {
            let result = fut.await;
            match &result {
                Ok(_) => info!(node = %node, "Node converged"),
                Err(e) => warn!(node = %node, error = %e, "Node did not converge"),
            }
            NodeOutcome { node, result }
        }
    });
    join_all(checks).await
}

pub fn all_ok<T>(outcomes: &[NodeOutcome<T>]) -> bool {
    outcomes.iter().all(NodeOutcome::is_ok)
}

/// Names of the nodes whose check failed
pub fn failed_nodes<T>(outcomes: &[NodeOutcome<T>]) -> Vec<&str> {
    outcomes
        .iter()
        .filter(|o| !o.is_ok())
        .map(|o| o.node.as_str())
        .collect()
}
