// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool-call gate.
//!
//! The single entry point a host adapter calls before running a tool. It
//! applies the per-agent rate limit for quarantine callers, then the Review
//! Mode enforcement pipeline, and hands every deny event to the audit sink.
//! Translating the [`Decision`] into a host's own accept/deny convention is the
//! adapter's concern.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::application::enforcement::{enforce_review_mode, guarded, Decision, EnforcementConfig};
use crate::domain::config::QuarantineConfig;
use crate::domain::security_event::{SecurityEvent, SecurityEventType, Severity};
use crate::domain::session::CallerMetadata;
use crate::infrastructure::audit::{redact_sensitive_args, SecurityAuditLogger};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::infrastructure::session_manager::SessionManager;

/// Pre-execution hook for tool calls.
pub trait ToolCallHook: Send + Sync {
    fn before_tool_use(&self, tool: &str, args: &Value, metadata: &CallerMetadata) -> Decision;
}

pub struct ToolCallGate {
    sessions: Arc<SessionManager>,
    rate_limiter: Arc<RateLimiter>,
    audit: Arc<SecurityAuditLogger>,
    config: EnforcementConfig,
}

impl ToolCallGate {
    pub fn new(
        sessions: Arc<SessionManager>,
        rate_limiter: Arc<RateLimiter>,
        audit: Arc<SecurityAuditLogger>,
        config: EnforcementConfig,
    ) -> Self {
        Self {
            sessions,
            rate_limiter,
            audit,
            config,
        }
    }

    pub fn from_config(
        sessions: Arc<SessionManager>,
        rate_limiter: Arc<RateLimiter>,
        audit: Arc<SecurityAuditLogger>,
        config: &QuarantineConfig,
    ) -> Self {
        Self::new(sessions, rate_limiter, audit, EnforcementConfig::from(config))
    }

    pub fn config(&self) -> &EnforcementConfig {
        &self.config
    }

    fn check_rate_limit(&self, tool: &str, metadata: &CallerMetadata) -> Option<Decision> {
        let result = self.rate_limiter.check_rate_limit(&metadata.agent_id);
        if result.allowed {
            return None;
        }

        let cause = result.reason.unwrap_or_else(|| "Rate limit exceeded".to_string());
        let reset_in_ms = result
            .reset_at
            .saturating_duration_since(tokio::time::Instant::now())
            .as_millis();
        let reset_in_ms = u64::try_from(reset_in_ms).unwrap_or(u64::MAX);
        Some(Decision::deny(
            SecurityEvent::new(
                SecurityEventType::RateLimitExceeded,
                Severity::Medium,
                metadata.agent_id.clone(),
                metadata.session_id.clone(),
                format!("Tool '{tool}' denied: {cause}"),
            )
            .with_tool(tool)
            .with_context("isQuarantine", metadata.is_quarantine)
            .with_context("remaining", result.remaining)
            .with_context("resetInMs", reset_in_ms),
        ))
    }

    fn evaluate(&self, tool: &str, args: &Value, metadata: &CallerMetadata) -> Decision {
        if metadata.is_quarantine && self.config.enabled {
            if let Some(denied) = self.check_rate_limit(tool, metadata) {
                return denied;
            }
        }

        let decision = enforce_review_mode(tool, args, metadata, &self.config);
        if decision.allowed {
            if let Err(e) = self.sessions.increment_tool_count(&metadata.session_id) {
                debug!(session_id = %metadata.session_id, "Tool count not updated: {}", e);
            }
        }
        decision
    }
}

impl ToolCallHook for ToolCallGate {
    fn before_tool_use(&self, tool: &str, args: &Value, metadata: &CallerMetadata) -> Decision {
        let decision = guarded(tool, metadata, || self.evaluate(tool, args, metadata));
        if let Some(event) = &decision.security_event {
            self.audit
                .record(event.clone().with_context("args", redact_sensitive_args(args)));
        }
        decision
    }
}
