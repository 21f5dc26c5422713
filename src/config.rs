use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppResult;
use crate::nudge::NudgeSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: Option<String>,

    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    #[serde(default = "default_resource_timeout_secs")]
    pub resource_timeout_secs: u64,

    #[serde(default = "default_delete_timeout_secs")]
    pub delete_timeout_secs: u64,

    #[serde(default = "default_conflict_timeout_secs")]
    pub conflict_timeout_secs: u64,

    #[serde(default = "default_policy_timeout_secs")]
    pub policy_timeout_secs: u64,

    #[serde(default = "default_nudge_delay_secs")]
    pub nudge_delay_secs: u64,

    #[serde(default = "default_nudge_interval_secs")]
    pub nudge_interval_secs: u64,

    /// Executable run to clear stuck finalizers; nudging is disabled without it
    #[serde(default)]
    pub nudge_script: Option<PathBuf>,
}

fn default_kubeconfig() -> Option<String> {
    None
}

fn default_sample_interval_secs() -> u64 {
    1
}

fn default_resource_timeout_secs() -> u64 {
    240
}

fn default_delete_timeout_secs() -> u64 {
    240
}

fn default_conflict_timeout_secs() -> u64 {
    3
}

fn default_policy_timeout_secs() -> u64 {
    480
}

fn default_nudge_delay_secs() -> u64 {
    30
}

fn default_nudge_interval_secs() -> u64 {
    5
}

/// Timeouts handed to every [`crate::lifecycle::ManagedResource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub sample_interval: Duration,
    pub resource: Duration,
    pub delete: Duration,
    pub conflict: Duration,
    pub policy: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Config::default().timeouts()
    }
}

impl Config {
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_env(config::Environment::with_prefix("NETCONVERGE"))
    }

    /// Unset variables take their defaults; a malformed value is an error
    fn from_env(env: config::Environment) -> AppResult<Self> {
        let settings: Config = config::Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> AppResult<()> {
        if self.sample_interval_secs == 0 {
            return Err(crate::error::AppError::Config(
                "sample_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            sample_interval: Duration::from_secs(self.sample_interval_secs),
            resource: Duration::from_secs(self.resource_timeout_secs),
            delete: Duration::from_secs(self.delete_timeout_secs),
            conflict: Duration::from_secs(self.conflict_timeout_secs),
            policy: Duration::from_secs(self.policy_timeout_secs),
        }
    }

    pub fn nudge_settings(&self) -> NudgeSettings {
        NudgeSettings {
            delay: Duration::from_secs(self.nudge_delay_secs),
            interval: Duration::from_secs(self.nudge_interval_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: default_kubeconfig(),
            sample_interval_secs: default_sample_interval_secs(),
            resource_timeout_secs: default_resource_timeout_secs(),
            delete_timeout_secs: default_delete_timeout_secs(),
            conflict_timeout_secs: default_conflict_timeout_secs(),
            policy_timeout_secs: default_policy_timeout_secs(),
            nudge_delay_secs: default_nudge_delay_secs(),
            nudge_interval_secs: default_nudge_interval_secs(),
            nudge_script: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.kubeconfig.is_none());
        assert_eq!(config.sample_interval_secs, 1);
        assert_eq!(config.conflict_timeout_secs, 3);
        assert!(config.nudge_script.is_none());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config::default();
        let timeouts = config.timeouts();
        assert_eq!(timeouts.conflict, Duration::from_secs(3));
        assert_eq!(timeouts.sample_interval, Duration::from_secs(1));

        let nudge = config.nudge_settings();
        assert_eq!(nudge.delay, Duration::from_secs(30));
        assert_eq!(nudge.interval, Duration::from_secs(5));
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let vars = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        config::Environment::with_prefix("NETCONVERGE").source(Some(vars))
    }

    #[test]
    fn test_load_from_environment() {
        let config = Config::from_env(env(&[
            ("NETCONVERGE_POLICY_TIMEOUT_SECS", "600"),
            ("NETCONVERGE_NUDGE_SCRIPT", "/usr/local/bin/clear-finalizers"),
        ]))
        .unwrap();

        assert_eq!(config.policy_timeout_secs, 600);
        assert_eq!(config.resource_timeout_secs, 240);
        assert_eq!(
            config.nudge_script,
            Some(PathBuf::from("/usr/local/bin/clear-finalizers"))
        );
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let result = Config::from_env(env(&[
            ("NETCONVERGE_POLICY_TIMEOUT_SECS", "ten minutes"),
            ("NETCONVERGE_NUDGE_SCRIPT", "/usr/local/bin/clear-finalizers"),
        ]));

        assert_eq!(result.unwrap_err().kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = Config {
            sample_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
