// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn hash_and_verify() -> anyhow::Result<()> {
    let hash = hash_password("hunter2")?;
    assert!(hash.starts_with("$argon2"));
    assert!(verify_password("hunter2", &hash));
    assert!(!verify_password("hunter3", &hash));
    assert!(!verify_password("hunter2", "not-a-phc-string"));
    Ok(())
}

#[test]
fn rehash_changes_fingerprint() -> anyhow::Result<()> {
    // Same password, fresh salt: the fingerprint must differ so a password
    // "change" to the same value still retires old tokens.
    let first = hash_password("hunter2")?;
    let second = hash_password("hunter2")?;
    assert_ne!(password_fingerprint(&first), password_fingerprint(&second));
    Ok(())
}

#[test]
fn token_round_trip() -> anyhow::Result<()> {
    let hash = hash_password("hunter2")?;
    let token = issue_token("secret", "alice", &hash)?;
    let claims = verify_token("secret", &token)?;
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.fp, password_fingerprint(&hash));
    Ok(())
}

#[test]
fn wrong_secret_rejected() -> anyhow::Result<()> {
    let hash = hash_password("hunter2")?;
    let token = issue_token("secret", "alice", &hash)?;
    assert!(verify_token("other-secret", &token).is_err());
    assert!(verify_token("secret", "garbage.token.here").is_err());
    Ok(())
}

#[test]
fn password_change_invalidates_fingerprint() -> anyhow::Result<()> {
    let old_hash = hash_password("hunter2")?;
    let token = issue_token("secret", "alice", &old_hash)?;

    let new_hash = hash_password("correct horse")?;
    let claims = verify_token("secret", &token)?;
    // The signature still verifies; the fingerprint no longer matches.
    assert_ne!(claims.fp, password_fingerprint(&new_hash));
    Ok(())
}
