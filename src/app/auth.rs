//! Auth: password hashing for the `users` table and JWT issuance/
//! verification for the bearer token every non-`Login` command carries.

use crate::app::db::UserRole;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TOKEN_TTL_SECS: i64 = 3600;
// Matches the original's literal secret -- a real deployment would load this
// from the environment, but spec.md's Non-goals exclude a secrets-management
// layer, so the constant is kept as-is.
const JWT_SECRET: &[u8] = b"software_project_management";

#[derive(Debug, Error, Serialize, Deserialize)]
pub enum AppError {
    #[error("authentication failed")]
    AuthError,
    #[error("user does not have permission to perform this action")]
    PermissionDenied,
    #[error("resource not found")]
    NotFound,
    #[error("conflicting state: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    username: String,
    role: UserRole,
    exp: i64,
}

/// Hashes `password` under a salt derived deterministically from
/// `username`. `CreateUser` is replicated through the log (spec.md 4.3:
/// "determinism is required because every replica applies the same
/// sequence"), so the salt cannot come from an RNG -- a random salt per
/// replica would make every replica's `password_verifier` diverge for the
/// same command, even though only `verify_password` is ever observed
/// through the read API.
pub fn hash_password(username: &str, password: &str) -> String {
    let salt = derive_salt(username);
    Argon2::default().hash_password(password.as_bytes(), &salt).expect("argon2 hashing is infallible here").to_string()
}

/// Folds `username` into a fixed-size byte buffer and base64-encodes it as
/// an argon2 salt. Not a cryptographic hash -- just a deterministic,
/// per-username mapping so two different usernames don't collide onto the
/// same salt, while every replica derives the identical value for the same
/// username.
fn derive_salt(username: &str) -> SaltString {
    const SALT_DOMAIN: u8 = 0x5a;
    let mut raw = [0u8; 16];
    for (i, b) in username.as_bytes().iter().enumerate() {
        raw[i % raw.len()] ^= b.wrapping_add((i as u8).wrapping_add(SALT_DOMAIN));
    }
    SaltString::encode_b64(&raw).expect("16 raw bytes is a valid argon2 salt length")
}

pub fn verify_password(password: &str, verifier: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(verifier) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// `issued_at` is the leader-assigned append-time timestamp from the
/// command envelope, not the replica's local clock, so every replica
/// derives the identical token when replaying this command.
pub fn issue_token(user_id: i64, username: &str, role: UserRole, issued_at: i64) -> Result<String, AppError> {
    let claims = Claims { sub: user_id, username: username.to_string(), role, exp: issued_at + TOKEN_TTL_SECS };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET)).map_err(|_| AppError::AuthError)
}

pub fn verify_token(token: &str) -> Result<AuthContext, AppError> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret(JWT_SECRET), &Validation::default())
        .map_err(|_| AppError::AuthError)?;
    Ok(AuthContext { user_id: data.claims.sub, username: data.claims.username, role: data.claims.role, exp: data.claims.exp })
}

pub fn require_role(ctx: &AuthContext, allowed: &[UserRole]) -> Result<(), AppError> {
    if allowed.contains(&ctx.role) {
        Ok(())
    } else {
        Err(AppError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trips() {
        let hash = hash_password("alice", "correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn same_username_and_password_hash_identically_across_replicas() {
        let a = hash_password("alice", "hunter2");
        let b = hash_password("alice", "hunter2");
        assert_eq!(a, b, "apply-path hashing must be deterministic given the same command");
    }

    #[test]
    fn different_usernames_get_different_salts() {
        let a = hash_password("alice", "same-password");
        let b = hash_password("bob", "same-password");
        assert_ne!(a, b);
    }

    #[test]
    fn token_round_trips_and_carries_role() {
        let token = issue_token(7, "alice", UserRole::Instructor, 1_000).unwrap();
        let ctx = verify_token(&token).unwrap();
        assert_eq!(ctx.user_id, 7);
        assert_eq!(ctx.username, "alice");
        assert_eq!(ctx.role, UserRole::Instructor);
        assert_eq!(ctx.exp, 1_000 + TOKEN_TTL_SECS);
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(verify_token("not.a.token").is_err());
    }

    #[test]
    fn require_role_enforces_allowed_set() {
        let ctx = AuthContext { user_id: 1, username: "s".into(), role: UserRole::Student, exp: 0 };
        assert!(require_role(&ctx, &[UserRole::Student, UserRole::Admin]).is_ok());
        assert!(require_role(&ctx, &[UserRole::Instructor]).is_err());
    }
}
