//! Relay configuration.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Settings shared by the launcher, the session manager and the reaper.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the completion service.
    pub api_base_url: String,
    /// Bearer credential embedded into every entrypoint.
    pub auth_token: String,
    /// Model used when an agent does not pick one.
    pub default_model: String,
    pub agents_dir: PathBuf,
    /// Where entrypoints, manifests and the runtime module are written.
    pub work_dir: PathBuf,
    /// Interpreter command for direct-process agents.
    pub python: String,
    /// Image used while an agent's own image is still being built.
    pub base_image: String,
    pub docker: String,
    pub direct_idle_timeout: Duration,
    pub container_idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Delay after each relayed content chunk.
    pub pacing: Duration,
    /// How long to wait for stderr and process exit once output ends.
    pub drain_grace: Duration,
}

impl RelayConfig {
    /// Build a config with defaults for everything but the upstream settings.
    #[must_use]
    pub fn new(
        api_base_url: impl Into<String>,
        auth_token: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            auth_token: auth_token.into(),
            default_model: default_model.into(),
            agents_dir: PathBuf::from("agents"),
            work_dir: std::env::temp_dir().join("agent-relay"),
            python: "python3".to_string(),
            base_image: "python:3.9-slim".to_string(),
            docker: "docker".to_string(),
            direct_idle_timeout: Duration::from_secs(30 * 60),
            container_idle_timeout: Duration::from_secs(2 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            pacing: Duration::from_millis(10),
            drain_grace: Duration::from_secs(5),
        }
    }

    /// Load from process environment variables.
    ///
    /// # Errors
    /// Returns error if a required variable is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns error if a required variable is missing, a number does not parse,
    /// or `SWEEP_INTERVAL_SECS` is zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let required = ["API_BASE_URL", "AUTH_TOKEN", "DEFAULT_MODEL"];
        let missing: Vec<&'static str> = required
            .iter()
            .copied()
            .filter(|name| get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let mut config = Self::new(
            get("API_BASE_URL").unwrap_or_default(),
            get("AUTH_TOKEN").unwrap_or_default(),
            get("DEFAULT_MODEL").unwrap_or_default(),
        );

        if let Some(dir) = get("AGENTS_DIR") {
            config.agents_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("RELAY_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(python) = get("AGENT_PYTHON") {
            config.python = python;
        }
        if let Some(image) = get("AGENT_BASE_IMAGE") {
            config.base_image = image;
        }
        if let Some(docker) = get("DOCKER_BIN") {
            config.docker = docker;
        }

        let secs = |name: &'static str| -> Result<Option<Duration>, ConfigError> {
            get(name)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|_| ConfigError::Invalid { name, value })
                })
                .transpose()
        };

        if let Some(d) = secs("DIRECT_IDLE_TIMEOUT_SECS")? {
            config.direct_idle_timeout = d;
        }
        if let Some(d) = secs("CONTAINER_IDLE_TIMEOUT_SECS")? {
            config.container_idle_timeout = d;
        }
        if let Some(d) = secs("SWEEP_INTERVAL_SECS")? {
            if d.is_zero() {
                return Err(ConfigError::Invalid {
                    name: "SWEEP_INTERVAL_SECS",
                    value: "0".to_string(),
                });
            }
            config.sweep_interval = d;
        }
        if let Some(value) = get("STREAM_PACING_MS") {
            let ms = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid {
                    name: "STREAM_PACING_MS",
                    value,
                })?;
            config.pacing = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
