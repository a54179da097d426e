// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Lexical path canonicalization used before a path is signed into a typed
//! reference. The signed path is always the resolved absolute form, so `.`,
//! `..` and repeated separators supplied by a caller collapse before signing and
//! cannot change what a token authorizes.
//!
//! Resolution is purely lexical: the filesystem is never touched and symlinks
//! are not followed.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Canonicalizes paths for capability minting

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Path sanitization errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathSanitizerError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path too long: {0}")]
    PathTooLong(String),

    #[error("Canonical path is not absolute: {0}")]
    NotAbsolute(String),

    #[error("Cannot resolve relative path without a working directory: {0}")]
    NoWorkingDirectory(String),
}

/// Resolves caller-supplied paths to absolute canonical form.
pub struct PathSanitizer {
    /// Maximum allowed path length (default: 4096)
    max_path_len: usize,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self { max_path_len: 4096 }
    }

    pub fn with_max_length(max_path_len: usize) -> Self {
        Self { max_path_len }
    }

    /// Resolve `path` against the process working directory.
    ///
    /// # Examples
    /// ```
    /// use review_mode::domain::path_sanitizer::PathSanitizer;
    /// use std::path::PathBuf;
    ///
    /// let sanitizer = PathSanitizer::new();
    /// let resolved = sanitizer.resolve("/workspace/../etc/./passwd").unwrap();
    /// assert_eq!(resolved, PathBuf::from("/etc/passwd"));
    /// ```
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathSanitizerError> {
        if Path::new(path).is_absolute() {
            return self.resolve_against(path, Path::new("/"));
        }
        let cwd = std::env::current_dir()
            .map_err(|_| PathSanitizerError::NoWorkingDirectory(path.to_string()))?;
        self.resolve_against(path, &cwd)
    }

    /// Resolve `path` against an explicit absolute `base` directory.
    ///
    /// Absolute inputs ignore `base`. `..` at the root stays at the root.
    pub fn resolve_against(&self, path: &str, base: &Path) -> Result<PathBuf, PathSanitizerError> {
        if path.len() > self.max_path_len {
            return Err(PathSanitizerError::PathTooLong(path.to_string()));
        }
        if path.is_empty() {
            return Err(PathSanitizerError::InvalidPath("empty path".to_string()));
        }
        if path.contains('\0') {
            tracing::warn!(path = %path.escape_default(), "Path contains null byte");
            return Err(PathSanitizerError::InvalidPath(
                "Path contains null byte".to_string(),
            ));
        }

        let input = Path::new(path);
        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            base.join(input)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => normalized.push(component),
                Component::CurDir => {}
                Component::ParentDir => {
                    if normalized.parent().is_some() {
                        normalized.pop();
                    }
                }
                Component::Normal(part) => normalized.push(part),
            }
        }

        if !normalized.is_absolute() {
            return Err(PathSanitizerError::NotAbsolute(
                normalized.to_string_lossy().into_owned(),
            ));
        }

        if normalized.as_os_str() != joined.as_os_str() {
            tracing::debug!(
                input = %path,
                resolved = %normalized.display(),
                "Path collapsed during canonicalization"
            );
        }

        Ok(normalized)
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}
