use crate::bus::EventBusConfig;
use crate::constants::{
    DEFAULT_CLEANUP_RETENTION, DEFAULT_MAX_RETRIES, DEFAULT_STALL_TIMEOUT, DEFAULT_WORKER_POOL_SIZE,
    HEALTH_CHECK_INTERVAL,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project_root: PathBuf,
    pub project_name: String,
    pub enabled_agents: Vec<String>,
    pub model_provider: String,
    pub model_name: String,
    pub test_mode: bool,
    pub event_bus: EventBusSettings,
    pub stall_timeout: Duration,
    pub max_retries: u32,
    pub cleanup_retention: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusSettings {
    pub backend: String,
    pub broker_bootstrap_addresses: Vec<String>,
    pub consumer_group: String,
    pub worker_pool_size: usize,
}

impl From<&EventBusSettings> for EventBusConfig {
    fn from(settings: &EventBusSettings) -> Self {
        EventBusConfig {
            backend: settings.backend.clone(),
            consumer_group: settings.consumer_group.clone(),
            worker_pool_size: settings.worker_pool_size,
        }
    }
}

impl Config {
    /// Loads configuration from the environment, falling back to a `.env`
    /// file in the working directory if present. Secrets (API keys) are
    /// read from the environment only, never from a config file, matching
    /// the ambient stack's secret-handling rule.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(path = ?path, "loaded .env file"),
            Err(e) => tracing::debug!(error = %e, "no .env file loaded"),
        }

        let project_root = env::var("MAF_PROJECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let project_name = env::var("MAF_PROJECT_NAME").unwrap_or_else(|_| "project".to_string());

        let enabled_agents = env::var("MAF_ENABLED_AGENTS")
            .unwrap_or_else(|_| crate::constants::AGENT_ROLES.join(","))
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for role in &enabled_agents {
            if !crate::constants::AGENT_ROLES.contains(&role.as_str()) {
                return Err(Error::Configuration(format!(
                    "MAF_ENABLED_AGENTS contains unknown role '{role}'"
                )));
            }
        }

        let model_provider =
            env::var("MAF_MODEL_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
        let model_name =
            env::var("MAF_MODEL_NAME").unwrap_or_else(|_| "claude-sonnet-4".to_string());

        let test_mode = env::var("MAF_TEST_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if !test_mode && model_provider == "anthropic" {
            let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
                Error::Configuration(
                    "ANTHROPIC_API_KEY environment variable is required outside test mode"
                        .to_string(),
                )
            })?;
            if api_key.trim().is_empty() {
                return Err(Error::Configuration("ANTHROPIC_API_KEY cannot be empty".to_string()));
            }
        }

        let backend = env::var("MAF_EVENT_BUS_BACKEND").unwrap_or_else(|_| "inmemory".to_string());
        if backend != "inmemory" && backend != "brokered" {
            return Err(Error::Configuration(format!(
                "MAF_EVENT_BUS_BACKEND must be 'inmemory' or 'brokered', got '{backend}'"
            )));
        }

        let broker_bootstrap_addresses = env::var("MAF_BROKER_BOOTSTRAP_ADDRESSES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let consumer_group =
            env::var("MAF_CONSUMER_GROUP").unwrap_or_else(|_| "multi-agent-runtime".to_string());

        let worker_pool_size = env::var("MAF_WORKER_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WORKER_POOL_SIZE);

        let stall_timeout_secs = env::var("MAF_STALL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_STALL_TIMEOUT.as_secs());

        let max_retries = env::var("MAF_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let cleanup_retention_secs = env::var("MAF_CLEANUP_RETENTION_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CLEANUP_RETENTION.as_secs());

        let heartbeat_interval_secs = env::var("MAF_HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(HEALTH_CHECK_INTERVAL.as_secs());

        Ok(Config {
            project_root,
            project_name,
            enabled_agents,
            model_provider,
            model_name,
            test_mode,
            event_bus: EventBusSettings {
                backend,
                broker_bootstrap_addresses,
                consumer_group,
                worker_pool_size,
            },
            stall_timeout: Duration::from_secs(stall_timeout_secs),
            max_retries,
            cleanup_retention: Duration::from_secs(cleanup_retention_secs),
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "MAF_PROJECT_ROOT",
            "MAF_PROJECT_NAME",
            "MAF_ENABLED_AGENTS",
            "MAF_MODEL_PROVIDER",
            "MAF_MODEL_NAME",
            "MAF_TEST_MODE",
            "ANTHROPIC_API_KEY",
            "MAF_EVENT_BUS_BACKEND",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_mode_does_not_require_an_api_key() {
        clear_env();
        env::set_var("MAF_TEST_MODE", "true");
        let config = Config::load().unwrap();
        assert!(config.test_mode);
    }

    #[test]
    #[serial]
    fn unknown_enabled_agent_is_rejected() {
        clear_env();
        env::set_var("MAF_TEST_MODE", "true");
        env::set_var("MAF_ENABLED_AGENTS", "frontend_agent,time_traveler_agent");
        let result = Config::load();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn unknown_event_bus_backend_is_rejected() {
        clear_env();
        env::set_var("MAF_TEST_MODE", "true");
        env::set_var("MAF_EVENT_BUS_BACKEND", "carrier_pigeon");
        let result = Config::load();
        assert!(result.is_err());
    }
}
