//! Signed, expiring capability tokens for email review links.
//!
//! Token shape: `"{booking_id}.{expires_unix}.{hex hmac-sha256}"`, where the
//! MAC covers `"{booking_id}.{expires_unix}"`. A token is therefore bound to
//! exactly one booking; reviewer and master come from that booking row, never
//! from the link. Single use is enforced by the one-review-per-booking
//! constraint at insert time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Review links stay valid for a week.
pub const TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("malformed review token")]
    Malformed,
    #[error("review link has expired")]
    Expired,
    #[error("review token signature mismatch")]
    BadSignature,
}

fn mac(secret: &str, payload: &str) -> HmacSha256 {
    let mut m =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    m.update(payload.as_bytes());
    m
}

/// Issue a token for `booking_id` expiring at `expires_at` (unix seconds).
pub fn issue(secret: &str, booking_id: i64, expires_at: i64) -> String {
    let payload = format!("{booking_id}.{expires_at}");
    let sig = hex::encode(mac(secret, &payload).finalize().into_bytes());
    format!("{payload}.{sig}")
}

/// Verify a token and return the booking id it is bound to.
pub fn verify(secret: &str, token: &str, now: i64) -> Result<i64, TokenError> {
    let mut parts = token.splitn(3, '.');
    let (Some(id_part), Some(exp_part), Some(sig_part)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };
    let booking_id: i64 = id_part.parse().map_err(|_| TokenError::Malformed)?;
    let expires_at: i64 = exp_part.parse().map_err(|_| TokenError::Malformed)?;
    let sig = hex::decode(sig_part).map_err(|_| TokenError::Malformed)?;

    // Constant-time comparison via Mac::verify_slice.
    mac(secret, &format!("{id_part}.{exp_part}"))
        .verify_slice(&sig)
        .map_err(|_| TokenError::BadSignature)?;

    if expires_at < now {
        return Err(TokenError::Expired);
    }
    Ok(booking_id)
}

// ── Tests ──
