// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HMAC Primitives Domain Service
//!
//! Key generation, HMAC-SHA256 signing and constant-time digest comparison for
//! the Review Mode capability scheme.
//!
//! ## Reference binding format
//!
//! ```text
//! HMAC-SHA256( path "|" issued_at "|" session_id , session_key )  → 64 lowercase hex chars
//! ```
//!
//! The separator and field order are part of the token format. Changing either
//! invalidates every outstanding [`crate::domain::typed_reference::TypedReference`].
//!
//! ## Key ownership
//!
//! A [`SecretKey`] is a shared handle onto one heap buffer. The owning session
//! holds the only long-lived handle; verification borrows the bytes for the
//! duration of a single HMAC computation. [`SecretKey::wipe`] overwrites the
//! buffer in place, so every handle observes the erasure.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted key size for [`generate_key`] (256 bits).
pub const MIN_KEY_SIZE: usize = 32;

/// Default key size used when none is configured.
pub const DEFAULT_KEY_SIZE: usize = 32;

/// Separator between the signed reference fields.
pub const REFERENCE_FIELD_SEPARATOR: char = '|';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HmacError {
    #[error("Key size must be at least {min} bytes, got {size}")]
    InvalidKeySize { size: usize, min: usize },

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
}

/// Session-owned HMAC key material.
///
/// Cloning a `SecretKey` clones the handle, not the bytes. The buffer is zeroed
/// when the last handle is dropped. `Debug` never prints key material.
#[derive(Clone)]
pub struct SecretKey {
    bytes: Arc<RwLock<Zeroizing<Box<[u8]>>>>,
}

impl SecretKey {
    /// Wrap raw key bytes. Intended for tests and key import; production keys
    /// come from [`generate_key`].
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(Zeroizing::new(bytes.into_boxed_slice()))),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with a transient borrow of the key bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.bytes.read();
        f(&guard)
    }

    /// True once every byte of the buffer is zero.
    pub fn is_zeroed(&self) -> bool {
        self.bytes.read().iter().all(|b| *b == 0)
    }

    /// Overwrite the key buffer with zeros in place.
    ///
    /// Only the session destruction path calls this. The buffer keeps its length
    /// so outstanding handles read zeros rather than a truncated slice.
    pub(crate) fn wipe(&self) {
        let mut guard = self.bytes.write();
        let buf: &mut [u8] = &mut guard[..];
        buf.zeroize();
    }

    /// Whether two handles point at the same key buffer.
    pub fn same_key(&self, other: &SecretKey) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED; {} bytes])", self.len())
    }
}

/// Generate `size` bytes of key material from the operating system CSPRNG.
///
/// # Errors
///
/// - [`HmacError::InvalidKeySize`] if `size < MIN_KEY_SIZE`
/// - [`HmacError::KeyGeneration`] if the OS random source is unavailable
pub fn generate_key(size: usize) -> Result<SecretKey, HmacError> {
    if size < MIN_KEY_SIZE {
        return Err(HmacError::InvalidKeySize {
            size,
            min: MIN_KEY_SIZE,
        });
    }

    let mut buf = vec![0u8; size];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| HmacError::KeyGeneration(e.to_string()))?;
    Ok(SecretKey::from_bytes(buf))
}

/// HMAC-SHA256 over `data`, hex-encoded (64 lowercase characters).
pub fn hmac(data: &[u8], key: &SecretKey) -> String {
    key.with_bytes(|k| {
        // HMAC pads or hashes the key to the block size; no length is rejected.
        let Ok(mut mac) = HmacSha256::new_from_slice(k) else {
            unreachable!("HMAC-SHA256 rejected a key");
        };
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    })
}

/// Compare two strings without leaking the position of the first difference.
///
/// Length mismatch returns early: digest length is public.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// The exact byte string signed for a typed reference.
pub fn reference_signing_input(path: &str, issued_at: i64, session_id: &str) -> String {
    format!(
        "{path}{sep}{issued_at}{sep}{session_id}",
        sep = REFERENCE_FIELD_SEPARATOR
    )
}

/// HMAC binding a path to a session and issuance time.
pub fn reference_hmac(path: &str, issued_at: i64, session_id: &str, key: &SecretKey) -> String {
    hmac(
        reference_signing_input(path, issued_at, session_id).as_bytes(),
        key,
    )
}

/// Recompute the reference HMAC and compare it to `expected` in constant time.
pub fn verify_reference_hmac(
    path: &str,
    issued_at: i64,
    session_id: &str,
    expected: &str,
    key: &SecretKey,
) -> bool {
    let actual = reference_hmac(path, issued_at, session_id, key);
    constant_time_eq(&actual, expected)
}
