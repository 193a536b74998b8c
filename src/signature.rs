//! GitHub webhook signature verification using HMAC-SHA256.
//!
//! The signature arrives in `X-Hub-Signature-256` as `sha256=<64 hex chars>`
//! and is checked against the raw request body before anything decodes it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";
/// Hex characters needed for a 256-bit MAC.
const SIGNATURE_HEX_LEN: usize = 256 / 4;

/// Verifies a `sha256=<hex>` signature header against `body` keyed by `secret`.
///
/// Headers of the wrong length or without the prefix are rejected before any
/// hex decoding. The MAC comparison is constant-time over its full length.
pub fn verify_signature(secret: &[u8], signature_header: &str, body: &[u8]) -> bool {
    if signature_header.len() != SIGNATURE_PREFIX.len() + SIGNATURE_HEX_LEN {
        return false;
    }
    let Some(hex_sig) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Computes the raw HMAC-SHA256 of `body`.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so the error arm is unreachable.
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

/// Formats a MAC as a GitHub-style header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature))
}
