// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Review Mode Enforcement
//!
//! The allow/deny decision for a single tool call issued by a quarantine agent.
//!
//! ## Pipeline
//!
//! Evaluated in order, first match wins:
//!
//! 1. caller is not a quarantine agent → allow
//! 2. Review Mode disabled → allow
//! 3. tool not in the allowlist (exact match) → deny `TOOL_BLOCKED` / high
//! 4. scan `filePath`, `path`, `pattern`, `content` for a `typed://` string
//! 5. none found → allow
//! 6. found, caller has no key → deny `HMAC_VERIFICATION_FAILED` / critical
//! 7. parse fails → deny `INVALID_TYPED_REFERENCE` / high
//! 8. verification fails → deny `HMAC_VERIFICATION_FAILED` / critical
//! 9. allow
//!
//! ## Fail-closed
//!
//! The pipeline runs under `catch_unwind`. A panic anywhere inside it becomes a
//! `TOOL_BLOCKED` / critical deny, never an allow and never an unwind into the
//! caller.
//!
//! Deny decisions carry their [`SecurityEvent`] as data. This module does not
//! log them; that is the audit sink's job.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use serde_json::Value;

use crate::domain::config::QuarantineConfig;
use crate::domain::security_event::{SecurityEvent, SecurityEventType, Severity};
use crate::domain::session::CallerMetadata;
use crate::domain::tool_allowlist::{is_tool_allowed, QUARANTINE_ALLOWED_TOOLS};
use crate::domain::typed_reference::{
    self, looks_like_typed_reference, VerificationErrorKind, DEFAULT_TYPED_REFERENCE_TTL,
};

/// Argument fields scanned for an embedded typed reference, in priority order.
pub const TYPED_REFERENCE_FIELDS: [&str; 4] = ["filePath", "path", "pattern", "content"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementConfig {
    pub enabled: bool,
    pub allowed_tools: Vec<String>,
    /// Seconds.
    pub typed_reference_ttl: u64,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_tools: QUARANTINE_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
            typed_reference_ttl: DEFAULT_TYPED_REFERENCE_TTL,
        }
    }
}

impl From<&QuarantineConfig> for EnforcementConfig {
    fn from(config: &QuarantineConfig) -> Self {
        Self {
            enabled: config.enabled,
            allowed_tools: config.allowed_tools.clone(),
            typed_reference_ttl: config.typed_reference_ttl,
        }
    }
}

/// Outcome of an enforcement check. `security_event` is present exactly when
/// the call is denied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_event: Option<SecurityEvent>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            security_event: None,
        }
    }

    pub fn deny(event: SecurityEvent) -> Self {
        Self {
            allowed: false,
            reason: Some(event.message.clone()),
            security_event: Some(event),
        }
    }

    fn denied(
        tool: &str,
        metadata: &CallerMetadata,
        event_type: SecurityEventType,
        severity: Severity,
        reason: String,
    ) -> Self {
        Self::deny(
            SecurityEvent::new(
                event_type,
                severity,
                metadata.agent_id.clone(),
                metadata.session_id.clone(),
                reason,
            )
            .with_tool(tool)
            .with_context("isQuarantine", metadata.is_quarantine),
        )
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// First typed-reference-shaped string among [`TYPED_REFERENCE_FIELDS`].
///
/// Non-object arguments have no fields and yield `None`.
pub fn extract_typed_reference_from_args(args: &Value) -> Option<&str> {
    let fields = args.as_object()?;
    TYPED_REFERENCE_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name).and_then(Value::as_str))
        .find(|value| looks_like_typed_reference(value))
}

/// Decide whether `tool` may run with `args` for the given caller.
pub fn enforce_review_mode(
    tool: &str,
    args: &Value,
    metadata: &CallerMetadata,
    config: &EnforcementConfig,
) -> Decision {
    guarded(tool, metadata, || evaluate(tool, args, metadata, config))
}

/// Run `pipeline`, converting a panic into a critical deny.
pub(crate) fn guarded(
    tool: &str,
    metadata: &CallerMetadata,
    pipeline: impl FnOnce() -> Decision,
) -> Decision {
    match catch_unwind(AssertUnwindSafe(pipeline)) {
        Ok(decision) => decision,
        Err(payload) => Decision::denied(
            tool,
            metadata,
            SecurityEventType::ToolBlocked,
            Severity::Critical,
            format!("Internal enforcement error: {}", panic_message(payload.as_ref())),
        ),
    }
}

fn evaluate(
    tool: &str,
    args: &Value,
    metadata: &CallerMetadata,
    config: &EnforcementConfig,
) -> Decision {
    if !metadata.is_quarantine || !config.enabled {
        return Decision::allow();
    }

    if !is_tool_allowed(tool, &config.allowed_tools) {
        return Decision::denied(
            tool,
            metadata,
            SecurityEventType::ToolBlocked,
            Severity::High,
            format!(
                "Tool '{}' is not allowed in Review Mode. Allowed tools: {}",
                tool,
                config.allowed_tools.join(", ")
            ),
        );
    }

    let Some(uri) = extract_typed_reference_from_args(args) else {
        return Decision::allow();
    };

    let Some(key) = metadata.key.as_ref() else {
        return Decision::denied(
            tool,
            metadata,
            SecurityEventType::HmacVerificationFailed,
            Severity::Critical,
            format!("TypedReference found but agent has no HMAC key (tool '{tool}')"),
        );
    };

    let reference = match typed_reference::parse(uri) {
        Ok(reference) => reference,
        Err(e) => {
            let mut decision = Decision::denied(
                tool,
                metadata,
                SecurityEventType::InvalidTypedReference,
                Severity::High,
                format!(
                    "Invalid TypedReference format ({}): {} (tool '{}')",
                    VerificationErrorKind::MalformedReference,
                    e,
                    tool
                ),
            );
            attach_verification_error(&mut decision, VerificationErrorKind::MalformedReference);
            return decision;
        }
    };

    if let Err(e) = typed_reference::verify(
        &reference,
        &metadata.session_id,
        key,
        config.typed_reference_ttl,
    ) {
        let kind = e.kind();
        let mut decision = Decision::denied(
            tool,
            metadata,
            SecurityEventType::HmacVerificationFailed,
            Severity::Critical,
            format!(
                "HMAC verification failed for TypedReference: {} ({}) (tool '{}')",
                reference.path, kind, tool
            ),
        );
        attach_verification_error(&mut decision, kind);
        return decision;
    }

    Decision::allow()
}

fn attach_verification_error(decision: &mut Decision, kind: VerificationErrorKind) {
    if let Some(event) = decision.security_event.as_mut() {
        event
            .context
            .insert("verificationError".to_string(), Value::from(kind.as_str()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown error"
    }
}
