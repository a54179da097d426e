// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Review Mode Session
//!
//! One session per agent execution. A session owns the only long-lived handle
//! to its HMAC key; every typed reference minted for the session is bound to
//! its id.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Session identity, key ownership and per-session counters

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::hmac_ops::{HmacError, SecretKey};

/// Value object: Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(#[from] HmacError),
}

/// A live session record.
///
/// `Clone` yields a snapshot of the counters that shares the key handle.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub agent_id: String,
    pub is_quarantine: bool,
    pub key: SecretKey,
    pub created_at: DateTime<Utc>,
    pub tool_call_count: u64,
    pub active: bool,
}

impl Session {
    pub(crate) fn new(agent_id: &str, is_quarantine: bool, key: SecretKey) -> Self {
        Self {
            session_id: SessionId::new(),
            agent_id: agent_id.to_string(),
            is_quarantine,
            key,
            created_at: Utc::now(),
            tool_call_count: 0,
            active: true,
        }
    }

    pub fn metadata(&self) -> CallerMetadata {
        CallerMetadata {
            agent_id: self.agent_id.clone(),
            session_id: self.session_id.to_string(),
            is_quarantine: self.is_quarantine,
            key: Some(self.key.clone()),
        }
    }
}

/// Identity of the agent issuing a tool call, as seen by the enforcement path.
///
/// `session_id` is kept as the raw string the host supplied; it is compared
/// byte-for-byte with the session id carried by a typed reference.
#[derive(Debug, Clone)]
pub struct CallerMetadata {
    pub agent_id: String,
    pub session_id: String,
    pub is_quarantine: bool,
    pub key: Option<SecretKey>,
}

impl CallerMetadata {
    /// Metadata for a trusted (non-quarantine) caller.
    pub fn trusted(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            is_quarantine: false,
            key: None,
        }
    }
}
