use crate::engine::{BackoffPolicy, EngineSettings, RenewalSettings};
use crate::error::ReconcileError;
use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub upstream: UpstreamConfig,
    pub summarizer: SummarizerConfig,
    pub engine: EngineConfig,
    pub subscriptions: SubscriptionsConfig,
    pub schedule: ScheduleConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Defaults to `<data_dir>/scribeline/scribeline.db`.
    pub database_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/scribeline/artifacts`.
    pub artifacts_root: Option<PathBuf>,
}

impl StoreConfig {
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => global::db_file(),
        }
    }

    pub fn artifacts_root(&self) -> Result<PathBuf> {
        match &self.artifacts_root {
            Some(path) => Ok(path.clone()),
            None => global::artifacts_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub graph_base_url: String,
    pub authority_url: String,
    /// Organizer object ids whose calendars discovery polls.
    pub organizers: Vec<String>,
    /// Only hosts with an address in this domain get a subscription.
    pub host_domain: Option<String>,
    /// Public URL the upstream posts change notifications to.
    pub notification_url: String,
    /// Shared secret echoed back in every change notification.
    pub client_state: String,
    pub request_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            authority_url: "https://login.microsoftonline.com".to_string(),
            organizers: Vec::new(),
            host_domain: None,
            notification_url: String::new(),
            client_state: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub api_endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub jitter_window_seconds: u64,
    pub max_attempts: u32,
    /// How long a "transcript not ready" record waits before the next check.
    pub not_ready_recheck_seconds: u64,
    /// Not-ready checks before a record is given up on (96 = 24h at 15min).
    pub max_not_ready_checks: u32,
    /// Not-ready checks after which each further check raises an alert.
    pub stale_pending_alert_checks: u32,
    pub max_concurrency: usize,
    pub invocation_budget_seconds: u64,
    pub summarize_lease_seconds: u64,
    pub discovery_lookback_hours: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 60,
            max_delay_seconds: 3600,
            jitter_window_seconds: 30,
            max_attempts: 8,
            not_ready_recheck_seconds: 900,
            max_not_ready_checks: 96,
            stale_pending_alert_checks: 16,
            max_concurrency: 4,
            invocation_budget_seconds: 540,
            summarize_lease_seconds: 600,
            discovery_lookback_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionsConfig {
    pub lifetime_hours: u64,
    /// Must exceed `renewal_interval_minutes`, or a subscription can expire
    /// between two renewal passes.
    pub renewal_lead_minutes: u64,
    pub renewal_interval_minutes: u64,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            lifetime_hours: 70,
            renewal_lead_minutes: 120,
            renewal_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub discovery_interval_seconds: u64,
    pub advance_interval_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            discovery_interval_seconds: 900,
            advance_interval_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8737".to_string(),
        }
    }
}

fn secs_to_chrono(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`, writing the defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if !path.exists() {
            info!("Config file not found, creating default at {:?}", path);
            let config = Self::default();
            config.save_to(path)?;
            config
        } else {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
            info!("Loaded config from {:?}", path);
            config
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    /// Secrets may come from the environment instead of the file.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 4] = [
            ("SCRIBELINE_CLIENT_SECRET", &mut self.upstream.client_secret),
            ("SCRIBELINE_SUMMARIZER_API_KEY", &mut self.summarizer.api_key),
            ("SCRIBELINE_TENANT_ID", &mut self.upstream.tenant_id),
            ("SCRIBELINE_CLIENT_ID", &mut self.upstream.client_id),
        ];
        for (key, field) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        let subs = &self.subscriptions;
        if subs.renewal_lead_minutes <= subs.renewal_interval_minutes {
            return Err(ReconcileError::Configuration(format!(
                "subscriptions.renewal_lead_minutes ({}) must exceed renewal_interval_minutes ({})",
                subs.renewal_lead_minutes, subs.renewal_interval_minutes
            )));
        }
        if subs.renewal_interval_minutes == 0 {
            return Err(ReconcileError::Configuration(
                "subscriptions.renewal_interval_minutes must be at least 1".to_string(),
            ));
        }
        let engine = &self.engine;
        if engine.max_concurrency == 0 {
            return Err(ReconcileError::Configuration(
                "engine.max_concurrency must be at least 1".to_string(),
            ));
        }
        if engine.base_delay_seconds > engine.max_delay_seconds {
            return Err(ReconcileError::Configuration(format!(
                "engine.base_delay_seconds ({}) exceeds max_delay_seconds ({})",
                engine.base_delay_seconds, engine.max_delay_seconds
            )));
        }
        if engine.max_attempts == 0 {
            return Err(ReconcileError::Configuration(
                "engine.max_attempts must be at least 1".to_string(),
            ));
        }
        if engine.max_not_ready_checks == 0 {
            return Err(ReconcileError::Configuration(
                "engine.max_not_ready_checks must be at least 1".to_string(),
            ));
        }
        let schedule = &self.schedule;
        if schedule.discovery_interval_seconds == 0 || schedule.advance_interval_seconds == 0 {
            return Err(ReconcileError::Configuration(
                "schedule intervals must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.engine.base_delay_seconds),
            Duration::from_secs(self.engine.max_delay_seconds),
            Duration::from_secs(self.engine.jitter_window_seconds),
        )
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let engine = &self.engine;
        EngineSettings {
            backoff: self.backoff(),
            max_attempts: engine.max_attempts,
            not_ready_recheck: secs_to_chrono(engine.not_ready_recheck_seconds),
            max_not_ready_checks: engine.max_not_ready_checks,
            stale_pending_alert_checks: engine.stale_pending_alert_checks,
            max_concurrency: engine.max_concurrency,
            invocation_budget: Duration::from_secs(engine.invocation_budget_seconds),
            summarize_lease: secs_to_chrono(engine.summarize_lease_seconds),
            discovery_lookback: secs_to_chrono(engine.discovery_lookback_hours.saturating_mul(3600)),
        }
    }

    /// A saturated renewal retry, jitter included, lands at least a tenth of
    /// an interval before the next pass, so a failing subscription is retried
    /// on every pass.
    pub fn renewal_settings(&self) -> RenewalSettings {
        let subs = &self.subscriptions;
        let interval = Duration::from_secs(subs.renewal_interval_minutes.saturating_mul(60));
        let slack = interval / 10;
        let mut backoff = self.backoff();
        backoff.jitter_window = backoff.jitter_window.min(slack);
        backoff.max_delay = backoff
            .max_delay
            .min(interval.saturating_sub(slack).saturating_sub(backoff.jitter_window));
        backoff.base_delay = backoff.base_delay.min(backoff.max_delay);
        RenewalSettings {
            subscription_lifetime: secs_to_chrono(subs.lifetime_hours.saturating_mul(3600)),
            renewal_lead: secs_to_chrono(subs.renewal_lead_minutes.saturating_mul(60)),
            backoff,
            max_concurrency: self.engine.max_concurrency,
            invocation_budget: Duration::from_secs(self.engine.invocation_budget_seconds),
            host_domain: self
                .upstream
                .host_domain
                .clone()
                .filter(|domain| !domain.trim().is_empty()),
        }
    }
}
