//! Error types for OCI API calls
//!
//! Most of the crate works with `anyhow::Result` and adds context at call
//! sites. HTTP failures are raised as [`ApiError`] so callers can downcast
//! and decide whether to retry, skip or ignore them.

use serde_json::Value;
use thiserror::Error;

/// A non-success response from an OCI endpoint
#[derive(Error, Debug, Clone)]
#[error("API request failed: {status} {code}: {message}")]
pub struct ApiError {
    pub status: u16,
    /// Service error code, e.g. `NotAuthorizedOrNotFound`
    pub code: String,
    pub message: String,
    /// `opc-request-id` echoed by the service
    pub request_id: Option<String>,
    /// Seconds from a `Retry-After` header
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// Build from a status and the raw body. OCI error bodies look like
    /// `{"code": "...", "message": "..."}`; anything else keeps a generic code.
    pub fn from_response(status: u16, body: &str, request_id: Option<String>) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        Self {
            status,
            code: field("code").unwrap_or_else(|| format!("HTTP{}", status)),
            message: field("message").unwrap_or_default(),
            request_id,
            retry_after: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Throttling and server-side failures
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, 429 | 500 | 501 | 502 | 503 | 504)
    }
}

/// Find an [`ApiError`] anywhere in an error chain
pub fn api_error(error: &anyhow::Error) -> Option<&ApiError> {
    error.chain().find_map(|e| e.downcast_ref::<ApiError>())
}

/// True when the error chain carries a 404 from the service
pub fn is_not_found(error: &anyhow::Error) -> bool {
    api_error(error).map(|e| e.is_not_found()).unwrap_or(false)
}

/// True when the error's service code is one of `codes`
pub fn has_error_code(error: &anyhow::Error, codes: &[String]) -> bool {
    let Some(api) = api_error(error) else {
        return false;
    };
    codes.iter().any(|c| c == &api.code || c == &api.status.to_string())
}

/// Format an OCI API error for display
/// Security: maps service failures to generic messages instead of echoing
/// raw response bodies
pub fn format_oci_error(error: &anyhow::Error) -> String {
    if let Some(api) = api_error(error) {
        return match api.status {
            401 => "Authentication failed. Check the API key, fingerprint and user OCID.".to_string(),
            403 | 404 if api.code == "NotAuthorizedOrNotFound" => {
                "Not authorized or not found. Check your IAM policies.".to_string()
            },
            403 => "Permission denied. Check your IAM policies.".to_string(),
            404 => "Resource not found.".to_string(),
            409 => "Resource conflict. The resource may be in an incorrect state.".to_string(),
            429 => "Rate limit exceeded. Please try again later.".to_string(),
            400 => format!("Invalid request ({}).", api.code),
            500..=599 => "OCI service temporarily unavailable. Please try again.".to_string(),
            _ => "Request failed. Check your network connection and try again.".to_string(),
        };
    }

    let error_str = format!("{:#}", error);

    // Truncate long error messages and drop control characters
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
