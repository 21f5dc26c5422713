//! Error types shared by every NetConverge component

use std::time::Duration;

use strum::{AsRefStr, Display};

/// Result alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised while driving cluster resources
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The observed state never reached what the caller waited for
    #[error("timed out after {elapsed:?} waiting for {what}{}", last_sample_suffix(.last_sample))]
    Timeout {
        what: String,
        elapsed: Duration,
        last_sample: Option<String>,
    },

    /// Optimistic-concurrency conflict: the resource version was stale
    #[error("conflict: {0}")]
    Conflict(String),

    /// Creation of a resource that already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Any other status returned by the API server
    #[error("api error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    /// Transport-level or client-side failure of the Kubernetes client
    #[error("kubernetes client error: {0}")]
    Kube(#[source] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The network policy controller reported a failed enactment
    #[error("policy {policy} is degraded: {message}")]
    PolicyDegraded { policy: String, message: String },

    /// Caller contract violation; never retried
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An external command (corrective action) failed
    #[error("command failed: {0}")]
    Command(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn last_sample_suffix(last_sample: &Option<String>) -> String {
    match last_sample {
        Some(sample) => format!(" (last sample: {})", sample),
        None => String::new(),
    }
}

/// Fieldless discriminant of [`AppError`], used to name tolerated error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Conflict,
    AlreadyExists,
    NotFound,
    Api,
    Kube,
    Serialization,
    PolicyDegraded,
    InvalidState,
    Command,
    Config,
    Internal,
}

impl AppError {
    pub fn internal(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }

    pub fn invalid_state(msg: &str) -> Self {
        AppError::InvalidState(msg.to_string())
    }

    pub fn command(msg: &str) -> Self {
        AppError::Command(msg.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Timeout { .. } => ErrorKind::Timeout,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Api { .. } => ErrorKind::Api,
            AppError::Kube(_) => ErrorKind::Kube,
            AppError::Serialization(_) => ErrorKind::Serialization,
            AppError::PolicyDegraded { .. } => ErrorKind::PolicyDegraded,
            AppError::InvalidState(_) => ErrorKind::InvalidState,
            AppError::Command(_) => ErrorKind::Command,
            AppError::Config(_) => ErrorKind::Config,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// The last observed sample carried by a timeout, if any
    pub fn last_sample(&self) -> Option<&str> {
        match self {
            AppError::Timeout { last_sample, .. } => last_sample.as_deref(),
            _ => None,
        }
    }
}

impl From<kube::Error> for AppError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => AppError::NotFound(resp.message),
                409 if resp.reason == "AlreadyExists" => AppError::AlreadyExists(resp.message),
                409 => AppError::Conflict(resp.message),
                code => AppError::Api {
                    code,
                    reason: resp.reason,
                    message: resp.message,
                },
            },
            other => AppError::Kube(other),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}
