// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Review Mode Configuration
//!
//! YAML configuration for the quarantine enforcement core. Every field has a
//! default, so an empty document (or no document at all) yields a working
//! configuration.
//!
//! # Example
//!
//! ```yaml
//! enabled: true
//! allowedTools: [Read, Grep, Glob]
//! hmacKeySize: 32
//! typedReferenceTTL: 3600
//! toolRateLimitPerMinute: 100
//! maxConcurrentQuarantineAgents: 5
//! quarantineAgentTimeout: 300000
//! auditLogPath: review-mode-audit.jsonl
//! ```
//!
//! # Discovery order
//!
//! 1. Explicit path passed to [`QuarantineConfig::load_or_default`]
//! 2. `REVIEW_MODE_CONFIG_PATH` environment variable
//! 3. `./review-mode.yaml`
//! 4. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::hmac_ops::{DEFAULT_KEY_SIZE, MIN_KEY_SIZE};
use crate::domain::tool_allowlist::{validate_tool_allowlist, QUARANTINE_ALLOWED_TOOLS};
use crate::domain::typed_reference::DEFAULT_TYPED_REFERENCE_TTL;

pub const CONFIG_PATH_ENV: &str = "REVIEW_MODE_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "./review-mode.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,

    /// Bytes of key material per session.
    #[serde(default = "default_hmac_key_size")]
    pub hmac_key_size: usize,

    /// Seconds a typed reference stays valid after minting.
    #[serde(default = "default_typed_reference_ttl", rename = "typedReferenceTTL")]
    pub typed_reference_ttl: u64,

    #[serde(default = "default_tool_rate_limit")]
    pub tool_rate_limit_per_minute: u32,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_quarantine_agents: usize,

    /// Milliseconds before a quarantine agent is timed out.
    #[serde(default = "default_agent_timeout_ms", rename = "quarantineAgentTimeout")]
    pub quarantine_agent_timeout_ms: u64,

    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_allowed_tools() -> Vec<String> {
    QUARANTINE_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect()
}

fn default_hmac_key_size() -> usize {
    DEFAULT_KEY_SIZE
}

fn default_typed_reference_ttl() -> u64 {
    DEFAULT_TYPED_REFERENCE_TTL
}

fn default_tool_rate_limit() -> u32 {
    100
}

fn default_max_concurrent() -> usize {
    5
}

fn default_agent_timeout_ms() -> u64 {
    300_000
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("review-mode-audit.jsonl")
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            allowed_tools: default_allowed_tools(),
            hmac_key_size: default_hmac_key_size(),
            typed_reference_ttl: default_typed_reference_ttl(),
            tool_rate_limit_per_minute: default_tool_rate_limit(),
            max_concurrent_quarantine_agents: default_max_concurrent(),
            quarantine_agent_timeout_ms: default_agent_timeout_ms(),
            audit_log_path: default_audit_log_path(),
        }
    }
}

impl QuarantineConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string. Blank input yields defaults.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from(DEFAULT_CONFIG_FILE);
        if cwd.exists() {
            return Some(cwd);
        }

        None
    }

    /// Load configuration with discovery, fallback to default.
    ///
    /// An explicit path that cannot be read or parsed is an error. Environment
    /// overrides are applied in every case.
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = explicit_path {
            tracing::info!("Loading review mode configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load review mode config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading review mode configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::debug!("No review mode configuration file found. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `REVIEW_MODE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("REVIEW_MODE_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: REVIEW_MODE_ENABLED=true");
                    self.enabled = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: REVIEW_MODE_ENABLED=false");
                    self.enabled = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for REVIEW_MODE_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup("REVIEW_MODE_ALLOWED_TOOLS") {
            let tools: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            tracing::info!(tools = ?tools, "Environment override: REVIEW_MODE_ALLOWED_TOOLS");
            self.allowed_tools = tools;
        }

        if let Some(val) = lookup("REVIEW_MODE_TYPED_REFERENCE_TTL") {
            match val.trim().parse::<u64>() {
                Ok(ttl) => {
                    tracing::info!("Environment override: REVIEW_MODE_TYPED_REFERENCE_TTL={}", ttl);
                    self.typed_reference_ttl = ttl;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for REVIEW_MODE_TYPED_REFERENCE_TTL: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let allowlist = validate_tool_allowlist(&self.allowed_tools);
        if !allowlist.valid {
            anyhow::bail!("Invalid allowedTools: {}", allowlist.errors.join("; "));
        }

        if self.hmac_key_size < MIN_KEY_SIZE {
            anyhow::bail!(
                "hmacKeySize must be at least {} bytes, got {}",
                MIN_KEY_SIZE,
                self.hmac_key_size
            );
        }

        if self.typed_reference_ttl == 0 {
            anyhow::bail!("typedReferenceTTL must be greater than zero");
        }

        if self.tool_rate_limit_per_minute == 0 {
            anyhow::bail!("toolRateLimitPerMinute must be greater than zero");
        }

        if self.max_concurrent_quarantine_agents == 0 {
            anyhow::bail!("maxConcurrentQuarantineAgents must be greater than zero");
        }

        if self.quarantine_agent_timeout_ms == 0 {
            anyhow::bail!("quarantineAgentTimeout must be greater than zero");
        }

        Ok(())
    }
}
