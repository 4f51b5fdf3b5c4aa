//! Webhook signature verification.
//!
//! Stripe-style scheme: the header carries `t=<unix ts>,v1=<hex hmac>` and
//! the signature is HMAC-SHA256 over `"{t}.{raw payload}"`. Verification
//! happens before the idempotency ledger; the ledger itself is
//! signature-agnostic.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::auth::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

const TOLERANCE_SECS: i64 = 300;

/// Literal accepted in development when no webhook secret is configured.
/// Production refuses to start without a secret, so this never applies there.
pub const DEV_FALLBACK_SIGNATURE: &str = "dev_signature";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature timestamp outside tolerance")]
    Stale,

    #[error("signature mismatch")]
    Mismatch,
}

pub fn verify_signature(
    secret: Option<&str>,
    header: Option<&str>,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;

    let Some(secret) = secret else {
        if header == DEV_FALLBACK_SIGNATURE {
            return Ok(());
        }
        return Err(SignatureError::Mismatch);
    };

    let mut timestamp: Option<i64> = None;
    let mut v1: Option<&str> = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1 = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let v1 = v1.ok_or(SignatureError::Malformed)?;

    if (now.timestamp() - timestamp).abs() > TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let expected = compute_signature(secret, timestamp, payload);
    if !constant_time_eq(expected.as_bytes(), v1.as_bytes()) {
        return Err(SignatureError::Mismatch);
    }

    Ok(())
}

/// Builds a header value for the given payload; the counterpart of
/// [`verify_signature`], used by tests and local tooling.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!("t={timestamp},v1={}", compute_signature(secret, timestamp, payload))
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
