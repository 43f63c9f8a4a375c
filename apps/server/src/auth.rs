//! Session token validation.
//!
//! Accounts, registration and login live in the separate account service; it
//! issues bearer tokens of the form `"{user_id}.{role}.{expires_unix}.{sig}"`
//! where `sig` is hex HMAC-SHA256 over `"{user_id}.{role}.{expires_unix}"`
//! with the shared `APP_SECRET`. This module only verifies tokens, it never
//! issues them.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Owner,
}

impl Role {
    fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::Client),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }
}

/// Authenticated caller extracted from a bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
    pub role: Role,
}

/// Verify a session token. `None` on any shape, signature or expiry failure.
pub fn verify_session_token(token: &str, secret: &str, now: i64) -> Option<AuthUser> {
    let mut parts = token.splitn(4, '.');
    let (id_part, role_part, exp_part, sig_part) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?);

    let id: i64 = id_part.parse().ok()?;
    let role = Role::parse(role_part)?;
    let expires_at: i64 = exp_part.parse().ok()?;

    let payload = format!("{id_part}.{role_part}.{exp_part}");
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    let sig = hex::decode(sig_part).ok()?;
    mac.verify_slice(&sig).ok()?;

    if expires_at < now {
        tracing::warn!("session token expired for user {}", id);
        return None;
    }
    Some(AuthUser { id, role })
}

/// Extract the caller from an `Authorization: Bearer <token>` header value.
pub fn extract_user_from_header(auth_header: &str, secret: &str, now: i64) -> Option<AuthUser> {
    let token = auth_header.strip_prefix("Bearer ")?;
    verify_session_token(token, secret, now)
}

/// Check whether the caller may use the admin surface.
pub fn is_owner(user: &AuthUser) -> bool {
    user.role == Role::Owner
}

/// Counterpart of the account service's signer, for tests only.
#[cfg(test)]
pub fn sign_session_token(secret: &str, id: i64, role: &str, expires_at: i64) -> String {
    let payload = format!("{id}.{role}.{expires_at}");
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("{payload}.{sig}")
}

// ── Tests ──
