// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Review Mode Audit Logger
//!
//! Sink for [`SecurityEvent`]s produced by the enforcement path.
//!
//! Every event is stamped with an id and UTC timestamp, has its context
//! redacted, and is emitted as a structured `tracing` record. When a log path is
//! configured, records are also buffered and appended to a JSON Lines file.
//!
//! ## Failure isolation
//!
//! Nothing in this module returns an error to the caller. Serialization and
//! file I/O failures are reported through `tracing` and otherwise discarded, so
//! an unavailable sink can never change an allow/deny outcome.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::config::QuarantineConfig;
use crate::domain::security_event::{SecurityEvent, SecurityEventType, Severity};

const REDACTED: &str = "[REDACTED]";
const MAX_PLAIN_STRING_CHARS: usize = 100;
const SENSITIVE_KEY_PATTERNS: [&str; 6] = [
    "password",
    "secret",
    "token",
    "apikey",
    "api_key",
    "credential",
];

pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100;

/// A security event as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SecurityEvent,
}

/// Redact credential-like keys and long strings from a tool argument value.
///
/// Keys containing `password`, `secret`, `token`, `apikey`, `api_key` or
/// `credential` (case-insensitive) are replaced wholesale. Strings longer than
/// 100 characters are replaced by their length. Objects nested in objects or
/// directly inside arrays are redacted recursively.
pub fn redact_sensitive_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(redact_map(map)),
        other => other.clone(),
    }
}

fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let lower = key.to_lowercase();
            let redacted = if SENSITIVE_KEY_PATTERNS.iter().any(|p| lower.contains(p)) {
                Value::String(REDACTED.to_string())
            } else {
                redact_value(value)
            };
            (key.clone(), redacted)
        })
        .collect()
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let len = s.chars().count();
            if len > MAX_PLAIN_STRING_CHARS {
                Value::String(format!("[REDACTED: {len} chars]"))
            } else {
                value.clone()
            }
        }
        Value::Object(map) => Value::Object(redact_map(map)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => Value::Object(redact_map(map)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

struct AuditState {
    buffer: Vec<AuditRecord>,
    total: u64,
}

/// Writes Review Mode security events to the structured log and, optionally, a JSONL file.
pub struct SecurityAuditLogger {
    log_path: Option<PathBuf>,
    max_buffer_size: usize,
    state: Mutex<AuditState>,
}

impl SecurityAuditLogger {
    /// Logger that only emits `tracing` records.
    pub fn new() -> Self {
        Self::build(None, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Logger that also appends records to `log_path`, flushing every
    /// `max_buffer_size` records.
    pub fn with_file(log_path: impl Into<PathBuf>, max_buffer_size: usize) -> Self {
        Self::build(Some(log_path.into()), max_buffer_size.max(1))
    }

    fn build(log_path: Option<PathBuf>, max_buffer_size: usize) -> Self {
        Self {
            log_path,
            max_buffer_size,
            state: Mutex::new(AuditState {
                buffer: Vec::new(),
                total: 0,
            }),
        }
    }

    pub fn from_config(config: &QuarantineConfig) -> Self {
        Self::with_file(config.audit_log_path.clone(), DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Stamp, redact, log and buffer `event`.
    pub fn record(&self, mut event: SecurityEvent) -> AuditRecord {
        event.context = redact_map(&event.context);
        let record = AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        };

        let payload = serde_json::to_string(&record).unwrap_or_else(|e| {
            debug!("Failed to serialize audit record: {}", e);
            String::new()
        });
        let ev = &record.event;
        let tool = ev.tool.as_deref().unwrap_or("");
        match ev.severity {
            Severity::Critical => error!(
                event_type = %ev.event_type,
                agent_id = %ev.agent_id,
                session_id = %ev.session_id,
                tool = %tool,
                severity = %ev.severity,
                record = %payload,
                "{}", ev.message
            ),
            Severity::High | Severity::Medium => warn!(
                event_type = %ev.event_type,
                agent_id = %ev.agent_id,
                session_id = %ev.session_id,
                tool = %tool,
                severity = %ev.severity,
                record = %payload,
                "{}", ev.message
            ),
            Severity::Low => info!(
                event_type = %ev.event_type,
                agent_id = %ev.agent_id,
                session_id = %ev.session_id,
                severity = %ev.severity,
                record = %payload,
                "{}", ev.message
            ),
        }

        let should_flush = {
            let mut state = self.state.lock();
            state.total += 1;
            if self.log_path.is_some() {
                state.buffer.push(record.clone());
            }
            state.buffer.len() >= self.max_buffer_size
        };
        if should_flush {
            self.flush();
        }

        record
    }

    pub fn log_quarantine_spawn(&self, agent_id: &str, session_id: &str) -> AuditRecord {
        self.record(SecurityEvent::new(
            SecurityEventType::QuarantineAgentSpawn,
            Severity::Low,
            agent_id,
            session_id,
            format!("Quarantine agent spawned: {agent_id}"),
        ))
    }

    pub fn log_quarantine_exit(&self, agent_id: &str, session_id: &str, reason: &str) -> AuditRecord {
        self.record(
            SecurityEvent::new(
                SecurityEventType::QuarantineAgentExit,
                Severity::Low,
                agent_id,
                session_id,
                format!("Quarantine agent exited: {agent_id} ({reason})"),
            )
            .with_context("reason", reason),
        )
    }

    /// Append buffered records to the log file. Failures are logged and dropped.
    pub fn flush(&self) {
        let Some(path) = &self.log_path else {
            return;
        };
        let records = std::mem::take(&mut self.state.lock().buffer);
        if records.is_empty() {
            return;
        }

        let mut jsonl = String::new();
        for record in &records {
            match serde_json::to_string(record) {
                Ok(line) => {
                    jsonl.push_str(&line);
                    jsonl.push('\n');
                }
                Err(e) => debug!("Failed to serialize audit record {}: {}", record.id, e),
            }
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(jsonl.as_bytes()));
        if let Err(e) = result {
            warn!(path = %path.display(), "Failed to write audit log: {}", e);
        }
    }

    pub fn buffered_events(&self) -> Vec<AuditRecord> {
        self.state.lock().buffer.clone()
    }

    pub fn event_count(&self) -> u64 {
        self.state.lock().total
    }
}

impl Default for SecurityAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SecurityAuditLogger {
    fn drop(&mut self) {
        self.flush();
    }
}
