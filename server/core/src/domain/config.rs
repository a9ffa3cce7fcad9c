// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// AFK Configuration Types
//
// One manifest configures every surface of the system:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Server: bind address, command TTL, sweep cadence, hub capacities
// - Hooks: server URL, bearer token, per-call deadlines, poll window
// - Observer: reconnection backoff and offline queue retries
// - Observability: log level and Prometheus exposition

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "afk.dev/v1";
pub const KIND: &str = "AfkConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfkConfigManifest {
    /// API version (must be "afk.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AfkConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: AfkConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable installation name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AfkConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hooks: HookConfig,

    #[serde(default)]
    pub observer: ObserverConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Lifetime of a pending command before the sweep expires it
    #[serde(default = "default_command_ttl")]
    pub command_ttl_seconds: u64,

    /// Cadence of the expiry, retention and idle sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Commands older than this are deleted regardless of status
    #[serde(default = "default_retention")]
    pub retention_seconds: u64,

    /// Frames kept in the hub's history ring
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Frames replayed to a newly connected observer
    #[serde(default = "default_replay_count")]
    pub replay_count: usize,

    #[serde(default = "default_subscriber_idle")]
    pub subscriber_idle_seconds: u64,

    /// Frames buffered per observer before it counts as gone
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    #[serde(default = "default_agent_idle")]
    pub agent_idle_seconds: u64,

    /// CORS origins allowed to reach the API (empty = any)
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            command_ttl_seconds: default_command_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            retention_seconds: default_retention(),
            history_capacity: default_history_capacity(),
            replay_count: default_replay_count(),
            subscriber_idle_seconds: default_subscriber_idle(),
            subscriber_buffer: default_subscriber_buffer(),
            agent_idle_seconds: default_agent_idle(),
            allowed_origins: vec![],
        }
    }
}

impl ServerConfig {
    pub fn command_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.command_ttl_seconds as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_seconds as i64)
    }

    pub fn subscriber_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.subscriber_idle_seconds as i64)
    }

    pub fn agent_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.agent_idle_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Bearer token (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Deadline for emitting a lifecycle event
    #[serde(default = "default_event_timeout")]
    pub event_timeout_ms: u64,

    /// Deadline for each broker lookup, claim or completion
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_pre_tool_use_wait")]
    pub pre_tool_use_max_wait_ms: u64,

    #[serde(default = "default_stop_wait")]
    pub stop_max_wait_ms: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            token: None,
            event_timeout_ms: default_event_timeout(),
            command_timeout_ms: default_command_timeout(),
            poll_interval_ms: default_poll_interval(),
            pre_tool_use_max_wait_ms: default_pre_tool_use_wait(),
            stop_max_wait_ms: default_stop_wait(),
        }
    }
}

impl HookConfig {
    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pre_tool_use_max_wait(&self) -> Duration {
        Duration::from_millis(self.pre_tool_use_max_wait_ms)
    }

    pub fn stop_max_wait(&self) -> Duration {
        Duration::from_millis(self.stop_max_wait_ms)
    }

    pub fn resolved_token(&self) -> Option<String> {
        resolve_secret(self.token.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Only stream frames for this agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_filter: Option<String>,

    #[serde(default = "default_initial_reconnect_delay")]
    pub initial_reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Failed sends before a queued command is discarded
    #[serde(default = "default_max_command_retries")]
    pub max_command_retries: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            token: None,
            agent_filter: None,
            initial_reconnect_delay_ms: default_initial_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_command_retries: default_max_command_retries(),
        }
    }
}

impl ObserverConfig {
    pub fn resolved_token(&self) -> Option<String> {
        resolve_secret(self.token.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn resolve_secret(value: Option<&str>) -> Option<String> {
    let value = value?;
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        None if value.is_empty() => None,
        None => Some(value.to_string()),
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_server_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_command_ttl() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_retention() -> u64 {
    60 * 60
}

fn default_history_capacity() -> usize {
    1000
}

fn default_replay_count() -> usize {
    50
}

fn default_subscriber_idle() -> u64 {
    10 * 60
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_agent_idle() -> u64 {
    10 * 60
}

fn default_event_timeout() -> u64 {
    1500
}

fn default_command_timeout() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_pre_tool_use_wait() -> u64 {
    30_000
}

fn default_stop_wait() -> u64 {
    5_000
}

fn default_initial_reconnect_delay() -> u64 {
    1000
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_max_command_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for AfkConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "afk-server".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: AfkConfigSpec::default(),
        }
    }
}

impl AfkConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AFK_CONFIG_PATH environment variable
    /// 2. ./afk-config.yaml (working directory)
    /// 3. ~/.afk/config.yaml (user home)
    /// 4. /etc/afk/config.yaml (system, Unix) or C:\ProgramData\Afk\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AFK_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./afk-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".afk").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/afk/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Afk\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing/invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the process environment in production)
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AFK_SERVER_URL").filter(|v| !v.is_empty()) {
            tracing::debug!("Environment override: AFK_SERVER_URL={}", url);
            self.spec.hooks.server_url = url.clone();
            self.spec.observer.server_url = url;
        }
        if let Some(token) = lookup("AFK_TOKEN").filter(|v| !v.is_empty()) {
            self.spec.hooks.token = Some(token.clone());
            self.spec.observer.token = Some(token);
        }
        if let Some(addr) = lookup("AFK_BIND_ADDRESS").filter(|v| !v.is_empty()) {
            self.spec.server.bind_address = addr;
        }

        override_number(&lookup, "AFK_PORT", &mut self.spec.server.port);
        override_number(&lookup, "AFK_EVENT_TIMEOUT_MS", &mut self.spec.hooks.event_timeout_ms);
        override_number(&lookup, "AFK_COMMAND_TIMEOUT_MS", &mut self.spec.hooks.command_timeout_ms);
        override_number(&lookup, "AFK_POLL_INTERVAL_MS", &mut self.spec.hooks.poll_interval_ms);
        override_number(
            &lookup,
            "AFK_PRE_TOOL_USE_MAX_WAIT_MS",
            &mut self.spec.hooks.pre_tool_use_max_wait_ms,
        );
        override_number(&lookup, "AFK_STOP_MAX_WAIT_MS", &mut self.spec.hooks.stop_max_wait_ms);
        override_number(
            &lookup,
            "AFK_MAX_RECONNECT_ATTEMPTS",
            &mut self.spec.observer.max_reconnect_attempts,
        );
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let server = &self.spec.server;
        if server.command_ttl_seconds == 0 {
            anyhow::bail!("spec.server.command_ttl_seconds must be greater than zero");
        }
        if server.sweep_interval_seconds == 0 {
            anyhow::bail!("spec.server.sweep_interval_seconds must be greater than zero");
        }
        if server.history_capacity == 0 || server.subscriber_buffer == 0 {
            anyhow::bail!("spec.server history_capacity and subscriber_buffer must be greater than zero");
        }
        if server.replay_count > server.history_capacity {
            anyhow::bail!(
                "spec.server.replay_count ({}) cannot exceed history_capacity ({})",
                server.replay_count,
                server.history_capacity
            );
        }

        let hooks = &self.spec.hooks;
        if hooks.server_url.is_empty() {
            anyhow::bail!("spec.hooks.server_url cannot be empty");
        }
        if hooks.poll_interval_ms == 0 || hooks.command_timeout_ms == 0 || hooks.event_timeout_ms == 0 {
            anyhow::bail!("spec.hooks timeouts and poll interval must be greater than zero");
        }

        let observer = &self.spec.observer;
        if observer.initial_reconnect_delay_ms == 0 {
            anyhow::bail!("spec.observer.initial_reconnect_delay_ms must be greater than zero");
        }
        if observer.max_reconnect_delay_ms < observer.initial_reconnect_delay_ms {
            anyhow::bail!("spec.observer.max_reconnect_delay_ms cannot be below initial_reconnect_delay_ms");
        }

        Ok(())
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => {
                tracing::debug!("Environment override: {}={}", key, raw);
                *target = value;
            }
            Err(_) => {
                tracing::warn!("Invalid value for {}: '{}'. Ignoring.", key, raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = AfkConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.server.command_ttl_seconds, 30);
        assert_eq!(manifest.spec.server.history_capacity, 1000);
        assert_eq!(manifest.spec.server.replay_count, 50);
        assert_eq!(manifest.spec.hooks.event_timeout(), Duration::from_millis(1500));
        assert_eq!(manifest.spec.hooks.pre_tool_use_max_wait(), Duration::from_secs(30));
        assert_eq!(manifest.spec.hooks.stop_max_wait(), Duration::from_secs(5));
        assert_eq!(manifest.spec.observer.max_command_retries, 3);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: afk.dev/v1
kind: AfkConfig
metadata:
  name: laptop
spec:
  server:
    port: 4000
  hooks:
    server_url: http://companion.local:4000
    stop_max_wait_ms: 2000
"#;
        let manifest = AfkConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.server.port, 4000);
        assert_eq!(manifest.spec.server.sweep_interval_seconds, 10);
        assert_eq!(manifest.spec.hooks.server_url, "http://companion.local:4000");
        assert_eq!(manifest.spec.hooks.stop_max_wait_ms, 2000);
        assert_eq!(manifest.spec.hooks.poll_interval_ms, 500);
        assert_eq!(manifest.spec.observer.server_url, "http://localhost:3000");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afk-config.yaml");

        let mut manifest = AfkConfigManifest::default();
        manifest.metadata.name = "ci".to_string();
        manifest.spec.observer.agent_filter = Some("a1".to_string());
        manifest.to_yaml_file(&path).unwrap();

        let loaded = AfkConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "ci");
        assert_eq!(loaded.spec.observer.agent_filter.as_deref(), Some("a1"));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AfkConfigManifest::load_or_default(Some(dir.path().join("missing.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AFK_SERVER_URL", "http://10.0.0.5:3000"),
            ("AFK_TOKEN", "secret"),
            ("AFK_POLL_INTERVAL_MS", "250"),
            ("AFK_STOP_MAX_WAIT_MS", "not-a-number"),
            ("AFK_PORT", "3100"),
        ]);
        let mut manifest = AfkConfigManifest::default();
        manifest.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(manifest.spec.hooks.server_url, "http://10.0.0.5:3000");
        assert_eq!(manifest.spec.observer.server_url, "http://10.0.0.5:3000");
        assert_eq!(manifest.spec.hooks.resolved_token().as_deref(), Some("secret"));
        assert_eq!(manifest.spec.hooks.poll_interval_ms, 250);
        assert_eq!(manifest.spec.hooks.stop_max_wait_ms, 5000);
        assert_eq!(manifest.spec.server.port, 3100);
    }

    #[test]
    fn test_validation() {
        let mut manifest = AfkConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.server.replay_count = 2000;
        assert!(manifest.validate().is_err());
        manifest.spec.server.replay_count = 50;

        manifest.spec.observer.max_reconnect_delay_ms = 10;
        assert!(manifest.validate().is_err());
        manifest.spec.observer.max_reconnect_delay_ms = 30_000;

        manifest.spec.hooks.poll_interval_ms = 0;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_literal_token_and_blank_token() {
        let mut hooks = HookConfig::default();
        assert!(hooks.resolved_token().is_none());
        hooks.token = Some("abc".to_string());
        assert_eq!(hooks.resolved_token().as_deref(), Some("abc"));
        hooks.token = Some(String::new());
        assert!(hooks.resolved_token().is_none());
    }
}
