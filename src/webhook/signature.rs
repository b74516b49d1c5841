use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::ErrorResponse;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-ghl-signature";

/// Check a hex HMAC-SHA256 of `body` keyed with `secret`. The header value
/// may carry a `sha256=` prefix.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Reject the request unless it is signed with `secret`. An empty secret
/// disables the check.
#[allow(clippy::result_large_err)]
pub fn check_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), Response> {
    if secret.is_empty() {
        return Ok(());
    }

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(signature) if verify_signature(secret, body, signature) => Ok(()),
        _ => {
            tracing::warn!("Webhook signature verification failed");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid webhook signature".to_string(),
                }),
            )
                .into_response())
        }
    }
}

/// Reject the request unless `header` carries exactly `secret`. An empty
/// secret disables the check.
#[allow(clippy::result_large_err)]
pub fn check_shared_secret(headers: &HeaderMap, header: &str, secret: &str) -> Result<(), Response> {
    if secret.is_empty() {
        return Ok(());
    }

    let provided = headers.get(header).and_then(|v| v.to_str().ok());
    if provided == Some(secret) {
        return Ok(());
    }

    tracing::warn!(header, "Webhook secret mismatch");
    Err((
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Invalid webhook secret".to_string(),
        }),
    )
        .into_response())
}
