//! Webhook related structures and hook parsing

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::routine::branch_from_ref;
use crate::signature::verify_signature;

/// Header carrying the HMAC-SHA256 signature of the body.
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";
/// Header carrying the event type, e.g. `push`.
pub const HEADER_EVENT: &str = "x-github-event";
/// Header carrying the unique delivery id.
pub const HEADER_DELIVERY: &str = "x-github-delivery";

/// A verified webhook delivery. Only produced once the signature matched.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub signature_header: String,
    pub event_type: String,
    pub delivery_id: String,
    pub raw_body: Bytes,
}

impl InboundEvent {
    pub fn is_push(&self) -> bool {
        self.event_type == "push"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub clone_url: String,
    #[serde(default)]
    pub master_branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pusher {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// The subset of a GitHub push event the pipeline needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    /// Full ref path, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: String,
    pub after: String,
    pub repository: Repository,
    pub pusher: Pusher,
    #[serde(default, rename = "compare")]
    pub compare_url: String,
}

impl PushPayload {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Last path segment of the ref.
    pub fn branch(&self) -> &str {
        branch_from_ref(&self.git_ref)
    }

    pub fn clone_url(&self) -> &str {
        &self.repository.clone_url
    }
}

fn required_header(headers: &HeaderMap, name: &'static str) -> Result<String> {
    let value = headers
        .get(name)
        .ok_or(PipelineError::MissingHeader(name))?
        .to_str()
        .map_err(|_| PipelineError::InvalidHeader(name))?;
    if value.is_empty() {
        return Err(PipelineError::MissingHeader(name));
    }
    Ok(value.to_string())
}

/// Extracts the protocol headers and verifies the signature over the exact
/// bytes received. The body is handed back only after verification.
pub fn parse_hook(secret: &[u8], headers: &HeaderMap, body: Bytes) -> Result<InboundEvent> {
    let signature_header = required_header(headers, HEADER_SIGNATURE)?;
    let event_type = required_header(headers, HEADER_EVENT)?;
    let delivery_id = required_header(headers, HEADER_DELIVERY)?;

    if !verify_signature(secret, &signature_header, &body) {
        return Err(PipelineError::SignatureMismatch);
    }

    Ok(InboundEvent {
        signature_header,
        event_type,
        delivery_id,
        raw_body: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{push_body, signed_headers};

    const SECRET: &[u8] = b"hook-secret";

    #[test]
    fn parses_signed_push() {
        let body = push_body("refs/heads/main", "https://example.com/repo.git");
        let headers = signed_headers(SECRET, "push", "delivery-1", &body);

        let event = parse_hook(SECRET, &headers, Bytes::from(body.clone())).unwrap();

        assert_eq!(event.event_type, "push");
        assert_eq!(event.delivery_id, "delivery-1");
        assert_eq!(&event.raw_body[..], &body[..]);
        assert!(event.is_push());
    }

    #[test]
    fn missing_headers_are_named() {
        let body = push_body("refs/heads/main", "https://example.com/repo.git");
        for name in [HEADER_SIGNATURE, HEADER_EVENT, HEADER_DELIVERY] {
            let mut headers = signed_headers(SECRET, "push", "delivery-1", &body);
            headers.remove(name);
            let err = parse_hook(SECRET, &headers, Bytes::from(body.clone())).unwrap_err();
            assert!(
                matches!(err, PipelineError::MissingHeader(missing) if missing == name),
                "unexpected error for {name}: {err}"
            );
        }
    }

    #[test]
    fn empty_delivery_id_counts_as_missing() {
        let body = push_body("refs/heads/main", "https://example.com/repo.git");
        let headers = signed_headers(SECRET, "push", "", &body);
        let err = parse_hook(SECRET, &headers, Bytes::from(body)).unwrap_err();
        assert!(matches!(err, PipelineError::MissingHeader(HEADER_DELIVERY)));
    }

    #[test]
    fn signature_mismatch_is_rejected() {
        let body = push_body("refs/heads/main", "https://example.com/repo.git");
        let headers = signed_headers(b"other-secret", "push", "delivery-1", &body);
        let err = parse_hook(SECRET, &headers, Bytes::from(body)).unwrap_err();
        assert!(matches!(err, PipelineError::SignatureMismatch));
    }

    #[test]
    fn signature_is_checked_against_raw_bytes() {
        let body = push_body("refs/heads/main", "https://example.com/repo.git");
        let headers = signed_headers(SECRET, "push", "delivery-1", &body);
        // Same JSON value, different bytes.
        let mut reformatted = body.clone();
        reformatted.push(b'\n');
        let err = parse_hook(SECRET, &headers, Bytes::from(reformatted)).unwrap_err();
        assert!(matches!(err, PipelineError::SignatureMismatch));
    }

    #[test]
    fn decodes_push_payload() {
        let body = push_body("refs/heads/feature-x", "https://example.com/repo.git");
        let payload = PushPayload::from_slice(&body).unwrap();

        assert_eq!(payload.git_ref, "refs/heads/feature-x");
        assert_eq!(payload.branch(), "feature-x");
        assert_eq!(payload.clone_url(), "https://example.com/repo.git");
        assert_eq!(payload.repository.master_branch, "main");
        assert_eq!(payload.pusher.email, "octo@example.com");
        assert!(payload.compare_url.starts_with("https://"));
    }

    #[test]
    fn payload_without_ref_is_invalid() {
        let err = PushPayload::from_slice(br#"{"before":"a","after":"b"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload(_)));
    }
}
