// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Password hashing and session tokens.
//!
//! Tokens are HS256 JWTs carrying a fingerprint of the stored password hash.
//! `loginByToken` re-derives the fingerprint from the *current* hash, so
//! changing the password invalidates every outstanding token without any
//! server-side session table.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Minimum accepted password length for `setup` and `changePassword`.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Username.
    pub sub: String,
    /// Fingerprint of the password hash current at issue time.
    pub fp: String,
    pub iat: i64,
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// Stable fingerprint of a PHC hash string. The tail covers both the salt
/// and the hash output, so any rehash produces a different fingerprint.
pub fn password_fingerprint(password_hash: &str) -> String {
    let bytes = password_hash.as_bytes();
    let start = bytes.len().saturating_sub(16);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

pub fn issue_token(
    secret: &str,
    username: &str,
    password_hash: &str,
) -> anyhow::Result<String> {
    let claims = TokenClaims {
        sub: username.to_owned(),
        fp: password_fingerprint(password_hash),
        iat: chrono::Utc::now().timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| anyhow::anyhow!("token signing failed: {e}"))
}

/// Verify the signature and return the claims. Tokens never expire on their
/// own; the fingerprint comparison in the login handler is what retires them.
pub fn verify_token(secret: &str, token: &str) -> anyhow::Result<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| anyhow::anyhow!("invalid token: {e}"))?;
    Ok(data.claims)
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
