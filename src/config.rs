//! Deployment configuration
//!
//! Every knob has a default. A deployment may load overrides from a JSON
//! file and then from `ORDERLY_*` environment variables, in that order.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::schema::DEFAULT_MAX_STEPS_PER_PLAN;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// What the engine does when a step's capability call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailurePolicy {
    /// Fail the whole plan.
    #[default]
    Abort,
    /// Move on to the next step.
    Skip,
}

impl std::str::FromStr for StepFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(StepFailurePolicy::Abort),
            "skip" => Ok(StepFailurePolicy::Skip),
            other => Err(format!("unknown step failure policy: {other}")),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plan execution settings
    pub engine: EngineConfig,
    /// Request limits
    pub orchestrator: OrchestratorConfig,
    /// External generator connection
    pub generator: GeneratorConfig,
}

/// Plan execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Behaviour on step failure
    pub step_failure_policy: StepFailurePolicy,
    /// Radius used for `enemy_count` and `ally_count`
    pub awareness_radius: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_failure_policy: StepFailurePolicy::Abort,
            awareness_radius: 30.0,
        }
    }
}

/// Limits applied to generator requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Longest plan accepted from the generator
    pub max_steps_per_plan: usize,
    /// Requests allowed in flight at once
    pub max_concurrent_requests: usize,
    /// Requests allowed to start in any rolling 60 second window
    pub requests_per_minute: usize,
    /// Per-attempt timeout
    pub request_timeout_ms: u64,
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Backoff before the first retry; doubles each attempt
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single backoff
    pub retry_max_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps_per_plan: DEFAULT_MAX_STEPS_PER_PLAN,
            max_concurrent_requests: 4,
            requests_per_minute: 60,
            request_timeout_ms: 30_000,
            max_retries: 2,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

impl OrchestratorConfig {
    /// Per-attempt timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `retry_max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.retry_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.retry_max_delay_ms))
    }
}

/// Connection to an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Chat-completions URL
    pub endpoint: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Completion token cap
    pub max_tokens: Option<u32>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: Some(0.2),
            max_tokens: None,
        }
    }
}

impl Config {
    /// Read a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Apply `ORDERLY_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup; used by [`apply_env`](Self::apply_env).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(endpoint) = get("ORDERLY_ENDPOINT") {
            self.generator.endpoint = endpoint;
        }
        if let Some(key) = get("ORDERLY_API_KEY") {
            self.generator.api_key = Some(key);
        }
        if let Some(model) = get("ORDERLY_MODEL") {
            self.generator.model = model;
        }
        if let Some(value) = get("ORDERLY_TEMPERATURE") {
            self.generator.temperature = Some(value.parse::<f32>().context("ORDERLY_TEMPERATURE")?);
        }
        if let Some(value) = get("ORDERLY_TIMEOUT_SECS") {
            let secs = value.parse::<u64>().context("ORDERLY_TIMEOUT_SECS")?;
            self.orchestrator.request_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(value) = get("ORDERLY_MAX_RETRIES") {
            self.orchestrator.max_retries = value.parse::<u32>().context("ORDERLY_MAX_RETRIES")?;
        }
        if let Some(value) = get("ORDERLY_MAX_CONCURRENT") {
            self.orchestrator.max_concurrent_requests =
                value.parse::<usize>().context("ORDERLY_MAX_CONCURRENT")?;
        }
        if let Some(value) = get("ORDERLY_REQUESTS_PER_MINUTE") {
            self.orchestrator.requests_per_minute =
                value.parse::<usize>().context("ORDERLY_REQUESTS_PER_MINUTE")?;
        }
        if let Some(value) = get("ORDERLY_MAX_STEPS") {
            self.orchestrator.max_steps_per_plan =
                value.parse::<usize>().context("ORDERLY_MAX_STEPS")?;
        }
        if let Some(value) = get("ORDERLY_STEP_FAILURE_POLICY") {
            self.engine.step_failure_policy = value
                .parse::<StepFailurePolicy>()
                .map_err(anyhow::Error::msg)
                .context("ORDERLY_STEP_FAILURE_POLICY")?;
        }
        Ok(())
    }
}
