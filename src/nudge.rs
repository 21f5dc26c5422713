//! Corrective actions for deletions stuck behind finalizers
//!
//! The platform occasionally stalls finalizer removal. While a deletion is
//! being awaited, a [`DeletionNudger`] is invoked on every poll iteration and,
//! after a grace delay, runs a rate-limited [`CorrectiveAction`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::k8s::{ClusterApi, ResourceRef};

/// Grace delay before the first corrective action
pub const DEFAULT_NUDGE_DELAY: Duration = Duration::from_secs(30);

/// Minimum time between two corrective actions
pub const DEFAULT_NUDGE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NudgeSettings {
    pub delay: Duration,
    pub interval: Duration,
}

impl Default for NudgeSettings {
    fn default() -> Self {
        Self {
            delay: DEFAULT_NUDGE_DELAY,
            interval: DEFAULT_NUDGE_INTERVAL,
        }
    }
}

/// Out-of-band action meant to unblock a stalled deletion
#[allow(async_fn_in_trait)]
pub trait CorrectiveAction {
    async fn run(&self, target: &ResourceRef) -> AppResult<()>;
}

impl<A: CorrectiveAction> CorrectiveAction for Option<A> {
    async fn run(&self, target: &ResourceRef) -> AppResult<()> {
        match self {
            Some(action) => action.run(target).await,
            None => Ok(()),
        }
    }
}

/// Runs an executable as `<program> <name> [namespace]`
#[derive(Debug, Clone)]
pub struct ScriptAction {
    program: PathBuf,
}

impl ScriptAction {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CorrectiveAction for ScriptAction {
    async fn run(&self, target: &ResourceRef) -> AppResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&target.name);
        if let Some(ns) = &target.namespace {
            cmd.arg(ns);
        }

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AppError::command(&format!("Failed to execute {}: {}", self.program.display(), e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AppError::command(&format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// Clears `metadata.finalizers` through the API server
#[derive(Debug)]
pub struct FinalizerPatchAction<'c, C> {
    cluster: &'c C,
}

impl<'c, C: ClusterApi> FinalizerPatchAction<'c, C> {
    pub fn new(cluster: &'c C) -> Self {
        Self { cluster }
    }
}

impl<C: ClusterApi> CorrectiveAction for FinalizerPatchAction<'_, C> {
    async fn run(&self, target: &ResourceRef) -> AppResult<()> {
        self.cluster
            .patch_merge(target, &json!({"metadata": {"finalizers": null}}))
            .await?;
        Ok(())
    }
}

/// Delayed, rate-limited corrective action bound to one resource
#[derive(Debug, Clone, Default)]
pub struct DeletionNudger {
    settings: NudgeSettings,
    first_seen: Option<Instant>,
    last_nudge: Option<Instant>,
    nudges: u32,
}

impl DeletionNudger {
    pub fn new(settings: NudgeSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Number of corrective actions attempted so far
    pub fn nudges(&self) -> u32 {
        self.nudges
    }

    /// Called once per deletion-wait iteration; returns whether an action ran.
    ///
    /// Nothing happens until the grace delay has passed since the first call,
    /// nor within `interval` of the previous action. A failing action is logged
    /// and retried on a later iteration.
    pub async fn nudge<A: CorrectiveAction>(&mut self, action: &A, target: &ResourceRef) -> bool {
        let now = Instant::now();
        let first_seen = *self.first_seen.get_or_insert(now);

        if now.duration_since(first_seen) <= self.settings.delay {
            return false;
        }
        if let Some(last) = self.last_nudge {
            if now.duration_since(last) < self.settings.interval {
                return false;
            }
        }

        self.nudges += 1;
        warn!(resource = %target, attempt = self.nudges, "Deletion still pending, running corrective action");
        match action.run(target).await {
            Ok(()) => info!(resource = %target, "Corrective action completed"),
            Err(e) => warn!(resource = %target, error = %e, "Corrective action failed"),
        }
        self.last_nudge = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::ResourceKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAction {
        runs: Mutex<Vec<Duration>>,
        fail: bool,
        origin: Option<Instant>,
    }

    impl CorrectiveAction for RecordingAction {
        async fn run(&self, _target: &ResourceRef) -> AppResult<()> {
            let origin = self.origin.unwrap_or_else(Instant::now);
            self.runs.lock().unwrap().push(origin.elapsed());
            if self.fail {
                Err(AppError::command("oc exited with 1"))
            } else {
                Ok(())
            }
        }
    }

    fn target() -> ResourceRef {
        ResourceRef::cluster_scoped(ResourceKind::NAMESPACE, "stuck-ns")
    }

    async fn drive(action: &RecordingAction, seconds: u64) -> Vec<Duration> {
        let mut nudger = DeletionNudger::new(NudgeSettings::default());
        for _ in 0..=seconds {
            nudger.nudge(action, &target()).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        action.runs.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_delay_and_rate_limit() {
        let action = RecordingAction {
            origin: Some(Instant::now()),
            ..Default::default()
        };
        let runs = drive(&action, 60).await;

        assert!(runs.iter().all(|t| *t > Duration::from_secs(30)));
        let first_window = runs
            .iter()
            .filter(|t| **t > Duration::from_secs(30) && **t <= Duration::from_secs(35))
            .count();
        assert_eq!(first_window, 1);
        for pair in runs.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
        assert_eq!(runs[0], Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_action_is_swallowed_and_retried() {
        let action = RecordingAction {
            origin: Some(Instant::now()),
            fail: true,
            ..Default::default()
        };
        let runs = drive(&action, 45).await;

        assert_eq!(
            runs,
            vec![
                Duration::from_secs(31),
                Duration::from_secs(36),
                Duration::from_secs(41)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_action_before_delay() {
        let action = RecordingAction::default();
        let mut nudger = DeletionNudger::new(NudgeSettings::default());

        for _ in 0..30 {
            assert!(!nudger.nudge(&action, &target()).await);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(nudger.nudges(), 0);
    }

    #[tokio::test]
    async fn test_script_action_reports_exit_status() {
        let ok = ScriptAction::new("true");
        assert!(ok.run(&target()).await.is_ok());

        let failing = ScriptAction::new("false");
        let err = failing.run(&target()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Command);
    }
}
