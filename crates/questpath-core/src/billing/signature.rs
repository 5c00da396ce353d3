//! Notification signature scheme.
//!
//! Header format: `t=<unix seconds>,v1=<hex>[,v1=<hex>...][,v0=...]`.
//! Each `v1` value is HMAC-SHA256 over `"<t>.<raw body>"` keyed with the
//! webhook secret. Any matching `v1` is accepted; other schemes are ignored.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("no v1 signature matches the payload")]
    NoMatchingSignature,

    #[error("signature timestamp {timestamp} is outside the {tolerance_secs}s tolerance")]
    TimestampOutsideTolerance { timestamp: i64, tolerance_secs: i64 },
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or_else(|| SignatureError::MalformedHeader(format!("bad element {part:?}")))?;
        match key {
            "t" => {
                let t = value.parse::<i64>().map_err(|e| {
                    SignatureError::MalformedHeader(format!("invalid timestamp: {e}"))
                })?;
                timestamp = Some(t);
            }
            // Undecodable entries simply never match.
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::MalformedHeader("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(SignatureError::NoMatchingSignature);
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

fn mac_for(secret: &[u8], timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Verify a signed payload.
///
/// Comparison is constant-time (`verify_slice`). The timestamp must be within
/// `tolerance_secs` of `now` in either direction.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let header = header
        .filter(|h| !h.trim().is_empty())
        .ok_or(SignatureError::MissingHeader)?;
    let parsed = parse_header(header)?;

    let matched = parsed.signatures.iter().any(|candidate| {
        mac_for(secret.as_bytes(), parsed.timestamp, payload)
            .verify_slice(candidate)
            .is_ok()
    });
    if !matched {
        return Err(SignatureError::NoMatchingSignature);
    }

    if now.timestamp().abs_diff(parsed.timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::TimestampOutsideTolerance {
            timestamp: parsed.timestamp,
            tolerance_secs,
        });
    }

    Ok(())
}

/// Produce a header value for `payload` signed at `timestamp`.
///
/// Used by tests and local tooling to generate notifications the service
/// will accept.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let sig = mac_for(secret.as_bytes(), timestamp, payload)
        .finalize()
        .into_bytes();
    format!("t={timestamp},v1={}", hex::encode(sig))
}
