// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Review Mode
//!
//! Quarantine enforcement core for agents that review attacker-influenced
//! content. A quarantine agent may only use allowlisted read-only tools, may only
//! address files through session-bound HMAC capability tokens, and runs under a
//! per-agent rate limit and deadline.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Capability tokens, sessions, rate limiting, timeouts and the
//!   fail-closed tool-call decision
//!
//! ```text
//! domain/          hmac_ops, typed_reference, session, tool_allowlist, config
//! infrastructure/  SessionManager, RateLimiter, TimeoutManager, SecurityAuditLogger
//! application/     enforce_review_mode, ToolCallGate, prepare_quarantine_spawn
//! ```
//!
//! Every registry is an owned value handed to its users; nothing here is a
//! process-wide singleton.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod telemetry;

pub use application::{enforce_review_mode, Decision, EnforcementConfig, ToolCallGate, ToolCallHook};
pub use domain::config::QuarantineConfig;
pub use domain::hmac_ops::SecretKey;
pub use domain::security_event::{SecurityEvent, SecurityEventType, Severity};
pub use domain::session::{CallerMetadata, SessionId};
pub use domain::typed_reference::TypedReference;
pub use infrastructure::{RateLimiter, SecurityAuditLogger, SessionManager, TimeoutManager};
