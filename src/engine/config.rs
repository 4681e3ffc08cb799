// Chatbridge Engine — Configuration
// BridgeConfig and its sections, TOML loading, environment overrides.

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ── Sections ───────────────────────────────────────────────────────────

/// Disconnect recovery: delay for attempt n is min(base * n, cap).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            cap_delay_ms: DEFAULT_RECONNECT_CAP_DELAY_MS,
        }
    }
}

/// Auth-failure recovery: one re-initialize after a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRetryPolicy {
    pub delay_ms: u64,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub limit: Option<u32>,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        AuthRetryPolicy {
            delay_ms: DEFAULT_AUTH_RETRY_DELAY_MS,
            limit: None,
        }
    }
}

impl AuthRetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Connection details for the Evolution API gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Evolution API base URL
    pub api_url: String,
    /// Evolution API key (sent as the `apikey` header)
    pub api_key: String,
    /// Instance name inside Evolution
    pub instance_name: String,
    /// Port for the local webhook listener Evolution posts events to
    pub webhook_port: u16,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        EvolutionConfig {
            api_url: DEFAULT_EVOLUTION_API_URL.into(),
            api_key: String::new(),
            instance_name: DEFAULT_EVOLUTION_INSTANCE.into(),
            webhook_port: DEFAULT_EVOLUTION_WEBHOOK_PORT,
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Where inbound messages are relayed. `None` disables the relay.
    pub webhook_url: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub auth_retry: AuthRetryPolicy,
    pub status_interval_secs: u64,
    pub relay_timeout_secs: u64,
    pub evolution: EvolutionConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            webhook_url: None,
            reconnect: ReconnectPolicy::default(),
            auth_retry: AuthRetryPolicy::default(),
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
            relay_timeout_secs: DEFAULT_RELAY_TIMEOUT_SECS,
            evolution: EvolutionConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load from the file named by `CHATBRIDGE_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> EngineResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        info!("[config] Loaded {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(format!("Parse config: {}", e)))
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests). Empty values are ignored, except that an
    /// empty `WEBHOOK_URL` clears the sink.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> EngineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WEBHOOK_URL") {
            let url = url.trim();
            self.webhook_url = if url.is_empty() { None } else { Some(url.to_string()) };
        }

        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("MAX_RECONNECT_ATTEMPTS") {
            self.reconnect.max_attempts = parse_num("MAX_RECONNECT_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RECONNECT_BASE_DELAY_MS") {
            self.reconnect.base_delay_ms = parse_num("RECONNECT_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("RECONNECT_CAP_DELAY_MS") {
            self.reconnect.cap_delay_ms = parse_num("RECONNECT_CAP_DELAY_MS", &v)?;
        }
        if let Some(v) = get("AUTH_RETRY_DELAY_MS") {
            self.auth_retry.delay_ms = parse_num("AUTH_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("AUTH_RETRY_LIMIT") {
            self.auth_retry.limit = Some(parse_num("AUTH_RETRY_LIMIT", &v)?);
        }
        if let Some(v) = get("STATUS_INTERVAL_SECS") {
            self.status_interval_secs = parse_num("STATUS_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("WEBHOOK_TIMEOUT_SECS") {
            self.relay_timeout_secs = parse_num("WEBHOOK_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("EVOLUTION_API_URL") {
            self.evolution.api_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("EVOLUTION_API_KEY") {
            self.evolution.api_key = v;
        }
        if let Some(v) = get("EVOLUTION_INSTANCE") {
            self.evolution.instance_name = v;
        }
        if let Some(v) = get("EVOLUTION_WEBHOOK_PORT") {
            self.evolution.webhook_port = parse_num("EVOLUTION_WEBHOOK_PORT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.reconnect.base_delay_ms == 0 {
            return Err(EngineError::Config("reconnect.base_delay_ms must be > 0".into()));
        }
        if self.reconnect.cap_delay_ms < self.reconnect.base_delay_ms {
            return Err(EngineError::Config(format!(
                "reconnect.cap_delay_ms ({}) is below base_delay_ms ({})",
                self.reconnect.cap_delay_ms, self.reconnect.base_delay_ms
            )));
        }
        if self.status_interval_secs == 0 {
            return Err(EngineError::Config("status_interval_secs must be > 0".into()));
        }
        if let Some(url) = &self.webhook_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| EngineError::Config(format!("webhook_url '{}': {}", url, e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(EngineError::Config(format!(
                    "webhook_url must be http(s), got '{}'",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value
        .parse::<T>()
        .map_err(|_| EngineError::Config(format!("{} must be a number, got '{}'", key, value)))
}
