// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Security Event Value Objects
//!
//! Structured description of a security-relevant occurrence. The enforcement
//! path produces these as data; only the audit sink
//! ([`crate::infrastructure::audit::SecurityAuditLogger`]) logs them.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Audit event vocabulary shared by enforcement, rate limiting and timeouts

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    QuarantineAgentSpawn,
    QuarantineAgentExit,
    ToolBlocked,
    HmacVerificationFailed,
    TypedReferenceExpired,
    RateLimitExceeded,
    InvalidTypedReference,
    SessionMismatch,
    QuarantineTimeout,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuarantineAgentSpawn => "QUARANTINE_AGENT_SPAWN",
            Self::QuarantineAgentExit => "QUARANTINE_AGENT_EXIT",
            Self::ToolBlocked => "TOOL_BLOCKED",
            Self::HmacVerificationFailed => "HMAC_VERIFICATION_FAILED",
            Self::TypedReferenceExpired => "TYPED_REFERENCE_EXPIRED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidTypedReference => "INVALID_TYPED_REFERENCE",
            Self::SessionMismatch => "SESSION_MISMATCH",
            Self::QuarantineTimeout => "QUARANTINE_TIMEOUT",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security event before it is stamped by the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub agent_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            tool: None,
            severity,
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_wire_names() {
        let event = SecurityEvent::new(
            SecurityEventType::ToolBlocked,
            Severity::High,
            "agent-1",
            "session-1",
            "blocked",
        )
        .with_tool("Bash")
        .with_context("isQuarantine", true);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "TOOL_BLOCKED",
                "agentId": "agent-1",
                "sessionId": "session-1",
                "tool": "Bash",
                "severity": "high",
                "message": "blocked",
                "context": { "isQuarantine": true }
            })
        );
    }

    #[test]
    fn test_tool_is_omitted_when_absent() {
        let event = SecurityEvent::new(
            SecurityEventType::QuarantineTimeout,
            Severity::High,
            "a",
            "s",
            "timed out",
        );
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("tool").is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }
}
