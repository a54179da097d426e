// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Quarantine spawn preparation.
//!
//! Creates the session, key and typed references a quarantine agent needs
//! before it starts. The returned [`SessionGuard`] destroys the session (and so
//! zeroes its key) when released or dropped, covering every exit path of the
//! caller.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domain::config::QuarantineConfig;
use crate::domain::hmac_ops::SecretKey;
use crate::domain::session::{CallerMetadata, SessionError};
use crate::domain::typed_reference::{self, TypedReference, TypedReferenceError};
use crate::infrastructure::session_manager::SessionManager;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Cannot spawn quarantine agent: {reason} ({current}/{max} active)")]
    ConcurrencyLimit {
        reason: String,
        current: usize,
        max: usize,
    },

    #[error("No file paths supplied for quarantine review")]
    NoFiles,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Reference(#[from] TypedReferenceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanSpawnResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub current_count: usize,
    pub max_count: usize,
}

pub fn can_spawn_quarantine(sessions: &SessionManager, config: &QuarantineConfig) -> CanSpawnResult {
    let current_count = sessions.get_active_quarantine_count();
    let max_count = config.max_concurrent_quarantine_agents;
    if current_count >= max_count {
        return CanSpawnResult {
            allowed: false,
            reason: Some("Maximum concurrent quarantine agents reached".to_string()),
            current_count,
            max_count,
        };
    }
    CanSpawnResult {
        allowed: true,
        reason: None,
        current_count,
        max_count,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub reference: TypedReference,
    pub uri: String,
    pub original_path: String,
}

/// Mint one reference per path for `session_id`.
pub fn create_file_references<S: AsRef<str>>(
    paths: &[S],
    session_id: &str,
    key: &SecretKey,
) -> Result<Vec<FileReference>, TypedReferenceError> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let reference = typed_reference::mint(path, session_id, key)?;
            Ok(FileReference {
                uri: reference.serialize(),
                reference,
                original_path: path.to_string(),
            })
        })
        .collect()
}

/// Scoped ownership of a quarantine session.
///
/// [`SessionGuard::release`] destroys the session at most once; dropping the
/// guard releases it if that has not happened yet.
pub struct SessionGuard {
    sessions: Arc<SessionManager>,
    session_id: String,
    released: AtomicBool,
}

impl SessionGuard {
    pub fn new(sessions: Arc<SessionManager>, session_id: impl Into<String>) -> Self {
        Self {
            sessions,
            session_id: session_id.into(),
            released: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns true only for the call that actually destroyed the session.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sessions.destroy_session(&self.session_id)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session_id", &self.session_id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PrepareQuarantineOptions {
    pub file_paths: Vec<String>,
    pub config: QuarantineConfig,
}

impl PrepareQuarantineOptions {
    pub fn new<P: AsRef<Path>>(file_paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            file_paths: file_paths
                .into_iter()
                .map(|p| p.as_ref().to_string_lossy().into_owned())
                .collect(),
            config: QuarantineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QuarantineConfig) -> Self {
        self.config = config;
        self
    }
}

/// Everything needed to launch one quarantine agent.
#[derive(Debug)]
pub struct QuarantineSpawn {
    pub agent_id: String,
    pub session_id: String,
    pub metadata: CallerMetadata,
    pub file_references: Vec<FileReference>,
    pub timeout: Duration,
    pub guard: SessionGuard,
}

impl QuarantineSpawn {
    pub fn uris(&self) -> Vec<&str> {
        self.file_references.iter().map(|r| r.uri.as_str()).collect()
    }

    pub fn canonical_paths(&self) -> Vec<PathBuf> {
        self.file_references
            .iter()
            .map(|r| PathBuf::from(&r.reference.path))
            .collect()
    }

    /// Destroy the session now. Idempotent.
    pub fn cleanup(&self) -> bool {
        self.guard.release()
    }
}

/// Check capacity, create a quarantine session and mint references for every file.
///
/// If minting fails the new session is destroyed before the error is returned.
pub fn prepare_quarantine_spawn(
    sessions: &Arc<SessionManager>,
    options: &PrepareQuarantineOptions,
) -> Result<QuarantineSpawn, SpawnError> {
    let check = can_spawn_quarantine(sessions, &options.config);
    if !check.allowed {
        return Err(SpawnError::ConcurrencyLimit {
            reason: check.reason.unwrap_or_default(),
            current: check.current_count,
            max: check.max_count,
        });
    }

    if options.file_paths.is_empty() {
        return Err(SpawnError::NoFiles);
    }

    let agent_id = Uuid::new_v4().to_string();
    let session = sessions.create_session(&agent_id, true)?;
    let session_id = session.session_id.to_string();
    let guard = SessionGuard::new(Arc::clone(sessions), session_id.clone());

    let file_references = create_file_references(options.file_paths.as_slice(), &session_id, &session.key)?;

    info!(
        agent_id = %agent_id,
        session_id = %session_id,
        files = file_references.len(),
        "Prepared quarantine spawn"
    );

    Ok(QuarantineSpawn {
        agent_id,
        session_id,
        metadata: session.metadata(),
        file_references,
        timeout: Duration::from_millis(options.config.quarantine_agent_timeout_ms),
        guard,
    })
}
