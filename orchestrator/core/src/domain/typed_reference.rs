// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Typed Reference Capability Token
//!
//! A [`TypedReference`] grants a quarantine session read access to exactly one
//! canonical path. It is a bearer value: it means nothing until verified against
//! the live key of the session it names.
//!
//! ## Lifecycle
//!
//! ```text
//! mint(path, session_id, key)          ← orchestrator, once per (path, session)
//!   └─ serialize() → typed://…          ← handed to the quarantine worker
//!        └─ parse(uri)                  ← on every tool call carrying the URI
//!             └─ verify(token, sid, key, ttl)
//! ```
//!
//! ## Verification order
//!
//! [`verify`] short-circuits on the first failure:
//! 1. `token.session_id != current_session_id` → `session_mismatch`
//! 2. `now - issued_at > ttl` → `expired`
//! 3. recomputed HMAC differs (constant-time) → `invalid_hmac`
//!
//! Only step 3 touches secret material.
//!
//! ## Wire format
//!
//! ```text
//! typed://<percent-encoded path>?hmac=<64 hex>&ts=<unix seconds>&sid=<session id>
//! ```
//!
//! Every path byte outside `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is percent-encoded,
//! including `/`; the query string is `application/x-www-form-urlencoded`. Fields beyond the four canonical ones are
//! ignored when a token is deserialized, since the HMAC covers only the signed
//! fields.

use std::fmt;

use chrono::Utc;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::domain::hmac_ops::{reference_hmac, verify_reference_hmac, SecretKey};
use crate::domain::path_sanitizer::{PathSanitizer, PathSanitizerError};

/// URI scheme prefix identifying a serialized typed reference.
pub const TYPED_REFERENCE_SCHEME: &str = "typed://";

/// Default time-to-live for a typed reference, in seconds.
pub const DEFAULT_TYPED_REFERENCE_TTL: u64 = 3600;

/// Characters left unescaped in the path component.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypedReferenceError {
    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathSanitizerError),

    #[error("Session ID must be a non-empty string")]
    InvalidSessionId,

    #[error("Malformed typed reference: {0}")]
    MalformedReference(String),
}

/// Session-bound, time-limited capability for one canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    /// Canonical absolute path the token authorizes.
    pub path: String,
    /// HMAC-SHA256 over `path|issued_at|session_id`, lowercase hex.
    pub hmac: String,
    /// Issuance time, unix seconds.
    #[serde(alias = "timestamp")]
    pub issued_at: i64,
    /// Session that minted the token.
    pub session_id: String,
}

/// Machine-readable verification failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationErrorKind {
    InvalidHmac,
    Expired,
    SessionMismatch,
    MalformedReference,
}

impl VerificationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidHmac => "invalid_hmac",
            Self::Expired => "expired",
            Self::SessionMismatch => "session_mismatch",
            Self::MalformedReference => "malformed_reference",
        }
    }
}

impl fmt::Display for VerificationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a typed reference failed verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Session mismatch: reference from session {token_session}, current session {current_session}")]
    SessionMismatch {
        token_session: String,
        current_session: String,
    },

    #[error("Reference expired: age {age_seconds}s exceeds TTL {ttl_seconds}s")]
    Expired { age_seconds: i64, ttl_seconds: u64 },

    #[error("HMAC verification failed")]
    InvalidHmac,
}

impl VerificationError {
    pub fn kind(&self) -> VerificationErrorKind {
        match self {
            Self::SessionMismatch { .. } => VerificationErrorKind::SessionMismatch,
            Self::Expired { .. } => VerificationErrorKind::Expired,
            Self::InvalidHmac => VerificationErrorKind::InvalidHmac,
        }
    }
}

impl TypedReference {
    /// Render as a `typed://` URI.
    pub fn serialize(&self) -> String {
        let encoded_path = utf8_percent_encode(&self.path, URI_COMPONENT);
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("hmac", &self.hmac)
            .append_pair("ts", &self.issued_at.to_string())
            .append_pair("sid", &self.session_id)
            .finish();
        format!("{TYPED_REFERENCE_SCHEME}{encoded_path}?{query}")
    }

    /// Exact inverse of [`TypedReference::serialize`].
    pub fn parse(uri: &str) -> Result<Self, TypedReferenceError> {
        parse(uri)
    }
}

impl fmt::Display for TypedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// True when `value` carries the typed reference scheme prefix.
pub fn looks_like_typed_reference(value: &str) -> bool {
    value.starts_with(TYPED_REFERENCE_SCHEME)
}

/// Mint a reference for `path`, bound to `session_id` and signed with `key`.
///
/// `path` is resolved to canonical absolute form before signing; relative
/// inputs resolve against the process working directory.
///
/// # Errors
///
/// - [`TypedReferenceError::InvalidPath`] if canonicalization fails or does not
///   yield an absolute path
/// - [`TypedReferenceError::InvalidSessionId`] if `session_id` is empty
pub fn mint(path: &str, session_id: &str, key: &SecretKey) -> Result<TypedReference, TypedReferenceError> {
    mint_with(&PathSanitizer::new(), path, session_id, key)
}

/// [`mint`] with an explicit sanitizer.
pub fn mint_with(
    sanitizer: &PathSanitizer,
    path: &str,
    session_id: &str,
    key: &SecretKey,
) -> Result<TypedReference, TypedReferenceError> {
    if session_id.is_empty() {
        return Err(TypedReferenceError::InvalidSessionId);
    }

    let canonical = sanitizer.resolve(path)?;
    let canonical = canonical
        .to_str()
        .ok_or_else(|| {
            TypedReferenceError::InvalidPath(PathSanitizerError::InvalidPath(
                "path is not valid UTF-8".to_string(),
            ))
        })?
        .to_string();

    let issued_at = Utc::now().timestamp();
    let hmac = reference_hmac(&canonical, issued_at, session_id, key);

    Ok(TypedReference {
        path: canonical,
        hmac,
        issued_at,
        session_id: session_id.to_string(),
    })
}

/// Verify `token` for `current_session_id` at the current wall-clock time.
pub fn verify(
    token: &TypedReference,
    current_session_id: &str,
    key: &SecretKey,
    ttl_seconds: u64,
) -> Result<(), VerificationError> {
    verify_at(token, current_session_id, key, ttl_seconds, Utc::now().timestamp())
}

/// [`verify`] against an explicit `now` (unix seconds).
pub fn verify_at(
    token: &TypedReference,
    current_session_id: &str,
    key: &SecretKey,
    ttl_seconds: u64,
    now: i64,
) -> Result<(), VerificationError> {
    if token.session_id != current_session_id {
        return Err(VerificationError::SessionMismatch {
            token_session: token.session_id.clone(),
            current_session: current_session_id.to_string(),
        });
    }

    // issued_at is attacker-controlled: saturate rather than overflow.
    let age = now.saturating_sub(token.issued_at);
    if i128::from(age) > i128::from(ttl_seconds) {
        return Err(VerificationError::Expired {
            age_seconds: age,
            ttl_seconds,
        });
    }

    if !verify_reference_hmac(&token.path, token.issued_at, &token.session_id, &token.hmac, key) {
        return Err(VerificationError::InvalidHmac);
    }

    Ok(())
}

/// Parse a `typed://` URI.
///
/// # Errors
///
/// [`TypedReferenceError::MalformedReference`] if the scheme is wrong, the query
/// string is absent, the path is not valid percent-encoded UTF-8, any of `hmac`,
/// `ts`, `sid` is missing or empty, or `ts` is not an integer. When a parameter
/// repeats, the first occurrence wins.
pub fn parse(uri: &str) -> Result<TypedReference, TypedReferenceError> {
    let rest = uri.strip_prefix(TYPED_REFERENCE_SCHEME).ok_or_else(|| {
        TypedReferenceError::MalformedReference(format!(
            "URI must start with \"{TYPED_REFERENCE_SCHEME}\""
        ))
    })?;

    let (encoded_path, query) = rest
        .split_once('?')
        .ok_or_else(|| TypedReferenceError::MalformedReference("missing query string".to_string()))?;

    let path = percent_decode_str(encoded_path)
        .decode_utf8()
        .map_err(|_| TypedReferenceError::MalformedReference("path is not valid UTF-8".to_string()))?
        .into_owned();

    let mut hmac = None;
    let mut ts = None;
    let mut sid = None;
    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
        let slot = match name.as_ref() {
            "hmac" => &mut hmac,
            "ts" => &mut ts,
            "sid" => &mut sid,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    let hmac = required_param(hmac, "hmac")?;
    let ts = required_param(ts, "ts")?;
    let session_id = required_param(sid, "sid")?;

    let issued_at = ts.parse::<i64>().map_err(|_| {
        TypedReferenceError::MalformedReference(format!("invalid timestamp \"{ts}\""))
    })?;

    Ok(TypedReference {
        path,
        hmac,
        issued_at,
        session_id,
    })
}

fn required_param(value: Option<String>, name: &str) -> Result<String, TypedReferenceError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(TypedReferenceError::MalformedReference(format!(
            "missing '{name}' parameter"
        ))),
    }
}
