// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Session Manager
//!
//! Owns the session table and every session key. Keys never leave process
//! memory and are zeroed before their session record is dropped.
//!
//! Lookups accept the session id as the host supplied it. A string that is not
//! a UUID simply finds nothing.

use dashmap::DashMap;
use tracing::{debug, info};

use crate::domain::config::QuarantineConfig;
use crate::domain::hmac_ops::{generate_key, SecretKey, DEFAULT_KEY_SIZE};
use crate::domain::session::{CallerMetadata, Session, SessionError, SessionId};

/// Smallest key size a manager can be configured with.
pub const MIN_CONFIGURABLE_KEY_SIZE: usize = 16;

pub struct SessionManager {
    sessions: DashMap<SessionId, Session>,
    key_size: usize,
}

impl SessionManager {
    pub fn new(key_size: usize) -> Result<Self, SessionError> {
        if key_size < MIN_CONFIGURABLE_KEY_SIZE {
            return Err(SessionError::InvalidArgument(format!(
                "HMAC key size must be at least {MIN_CONFIGURABLE_KEY_SIZE} bytes"
            )));
        }
        Ok(Self {
            sessions: DashMap::new(),
            key_size,
        })
    }

    pub fn from_config(config: &QuarantineConfig) -> Result<Self, SessionError> {
        Self::new(config.hmac_key_size)
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Create a session with a fresh id and key.
    ///
    /// Key generation errors propagate; a key size below the HMAC minimum is
    /// reported here rather than at construction.
    pub fn create_session(&self, agent_id: &str, is_quarantine: bool) -> Result<Session, SessionError> {
        if agent_id.is_empty() {
            return Err(SessionError::InvalidArgument(
                "Agent ID must be a non-empty string".to_string(),
            ));
        }

        let key = generate_key(self.key_size)?;
        let session = Session::new(agent_id, is_quarantine, key);
        self.sessions.insert(session.session_id, session.clone());

        info!(
            session_id = %session.session_id,
            agent_id = %agent_id,
            is_quarantine,
            "Session created"
        );
        Ok(session)
    }

    /// Snapshot of a session record.
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let id = SessionId::parse(session_id).ok()?;
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn get_session_key(&self, session_id: &str) -> Option<SecretKey> {
        let id = SessionId::parse(session_id).ok()?;
        self.sessions.get(&id).map(|s| s.key.clone())
    }

    pub fn get_metadata(&self, session_id: &str) -> Option<CallerMetadata> {
        let id = SessionId::parse(session_id).ok()?;
        self.sessions.get(&id).map(|s| s.metadata())
    }

    /// Zero the session key and drop the record. Returns whether it existed.
    pub fn destroy_session(&self, session_id: &str) -> bool {
        let Ok(id) = SessionId::parse(session_id) else {
            return false;
        };
        match self.sessions.remove(&id) {
            Some((_, session)) => {
                session.key.wipe();
                info!(session_id = %id, agent_id = %session.agent_id, "Session destroyed");
                true
            }
            None => {
                debug!(session_id = %session_id, "Destroy requested for unknown session");
                false
            }
        }
    }

    /// Zero and drop every session. Returns how many were destroyed.
    pub fn destroy_all_sessions(&self) -> usize {
        let mut count = 0;
        self.sessions.retain(|_, session| {
            session.key.wipe();
            count += 1;
            false
        });
        if count > 0 {
            info!(count, "All sessions destroyed");
        }
        count
    }

    pub fn get_active_sessions(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| s.active)
            .map(|s| s.clone())
            .collect()
    }

    pub fn get_active_quarantine_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.active && s.is_quarantine)
            .count()
    }

    pub fn increment_tool_count(&self, session_id: &str) -> Result<u64, SessionError> {
        let not_found = || SessionError::NotFound(session_id.to_string());
        let id = SessionId::parse(session_id).map_err(|_| not_found())?;
        let mut session = self.sessions.get_mut(&id).ok_or_else(not_found)?;
        session.tool_call_count += 1;
        Ok(session.tool_call_count)
    }

    /// Mark a session inactive, keeping its record and key.
    pub fn deactivate_session(&self, session_id: &str) -> bool {
        let Ok(id) = SessionId::parse(session_id) else {
            return false;
        };
        match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.active = false;
                debug!(session_id = %id, "Session deactivated");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.destroy_all_sessions();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            key_size: DEFAULT_KEY_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_small_key_size() {
        assert!(matches!(
            SessionManager::new(8),
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(SessionManager::new(16).is_ok());
    }

    #[test]
    fn test_key_size_below_hmac_minimum_fails_on_create() {
        let manager = SessionManager::new(16).unwrap();
        assert!(matches!(
            manager.create_session("agent-1", true),
            Err(SessionError::KeyGeneration(_))
        ));
    }

    #[test]
    fn test_create_session() {
        let manager = SessionManager::default();
        let session = manager.create_session("agent-1", true).unwrap();
        assert_eq!(session.agent_id, "agent-1");
        assert_eq!(session.key.len(), 32);
        assert!(session.active);

        let fetched = manager.get_session(&session.session_id.to_string()).unwrap();
        assert_eq!(fetched.session_id, session.session_id);
        assert!(fetched.key.same_key(&session.key));
    }

    #[test]
    fn test_create_session_rejects_empty_agent() {
        let manager = SessionManager::default();
        assert!(matches!(
            manager.create_session("", false),
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_sessions_get_distinct_ids_and_keys() {
        let manager = SessionManager::default();
        let a = manager.create_session("agent", true).unwrap();
        let b = manager.create_session("agent", true).unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(
            a.key.with_bytes(|k| k.to_vec()),
            b.key.with_bytes(|k| k.to_vec())
        );
    }

    #[test]
    fn test_destroy_zeroes_key_and_is_idempotent() {
        let manager = SessionManager::default();
        let session = manager.create_session("agent-1", true).unwrap();
        let id = session.session_id.to_string();
        let captured = manager.get_session_key(&id).unwrap();

        assert!(manager.destroy_session(&id));
        assert!(captured.is_zeroed());
        assert!(manager.get_session_key(&id).is_none());
        assert!(!manager.destroy_session(&id));
        assert!(!manager.destroy_session("not-a-uuid"));
    }

    #[test]
    fn test_destroy_all_sessions() {
        let manager = SessionManager::default();
        let keys: Vec<_> = (0..3)
            .map(|i| manager.create_session(&format!("agent-{i}"), i % 2 == 0).unwrap().key)
            .collect();
        assert_eq!(manager.destroy_all_sessions(), 3);
        assert!(keys.iter().all(SecretKey::is_zeroed));
        assert!(manager.is_empty());
        assert_eq!(manager.destroy_all_sessions(), 0);
    }

    #[test]
    fn test_active_quarantine_count_and_deactivate() {
        let manager = SessionManager::default();
        let q1 = manager.create_session("q1", true).unwrap();
        manager.create_session("q2", true).unwrap();
        manager.create_session("trusted", false).unwrap();
        assert_eq!(manager.get_active_quarantine_count(), 2);
        assert_eq!(manager.get_active_sessions().len(), 3);

        let id = q1.session_id.to_string();
        assert!(manager.deactivate_session(&id));
        assert_eq!(manager.get_active_quarantine_count(), 1);
        assert_eq!(manager.get_active_sessions().len(), 2);

        let retained = manager.get_session(&id).unwrap();
        assert!(!retained.active);
        assert!(!retained.key.is_zeroed());
        assert!(!manager.deactivate_session(&SessionId::new().to_string()));
    }

    #[test]
    fn test_increment_tool_count() {
        let manager = SessionManager::default();
        let id = manager.create_session("agent", true).unwrap().session_id.to_string();
        assert_eq!(manager.increment_tool_count(&id).unwrap(), 1);
        assert_eq!(manager.increment_tool_count(&id).unwrap(), 2);
        assert_eq!(manager.get_session(&id).unwrap().tool_call_count, 2);
        assert!(matches!(
            manager.increment_tool_count(&SessionId::new().to_string()),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_metadata_lookup() {
        let manager = SessionManager::default();
        let session = manager.create_session("agent", true).unwrap();
        let meta = manager.get_metadata(&session.session_id.to_string()).unwrap();
        assert_eq!(meta.agent_id, "agent");
        assert!(meta.is_quarantine);
        assert!(meta.key.unwrap().same_key(&session.key));
        assert!(manager.get_metadata("missing").is_none());
    }
}
