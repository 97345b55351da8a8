//! HTTP utilities for OCI REST API calls

use super::auth::{RequestSigner, SigningRequest};
use super::retry::{with_retry, RetryPolicy};
use crate::error::ApiError;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header carrying the pagination token
pub const NEXT_PAGE_HEADER: &str = "opc-next-page";

const REQUEST_ID_HEADER: &str = "opc-request-id";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// One response page
#[derive(Debug, Clone)]
pub struct Page {
    pub body: Value,
    /// Token for the following page, from `opc-next-page`
    pub next_page: Option<String>,
}

/// HTTP client wrapper for OCI API calls
#[derive(Clone)]
pub struct OciHttpClient {
    client: Client,
    retry: RetryPolicy,
}

impl OciHttpClient {
    /// Create a new HTTP client
    pub fn new(retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ocitables/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, retry })
    }

    /// Signed GET with the retry policy applied
    pub async fn get(&self, url: &str, signer: &dyn RequestSigner) -> Result<Page> {
        with_retry(&self.retry, |attempt| self.send_get(url, signer, attempt)).await
    }

    async fn send_get(&self, url: &str, signer: &dyn RequestSigner, attempt: u32) -> Result<Page> {
        tracing::debug!("GET {} (attempt {})", url, attempt);

        let parsed = Url::parse(url).with_context(|| format!("Invalid request URL: {}", url))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("Request URL has no host: {}", url),
        };
        let path_and_query = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let authorization = signer.authorization(&SigningRequest {
            method: "GET",
            path_and_query: &path_and_query,
            host: &host,
            date: &date,
        })?;

        let response = self
            .client
            .get(parsed)
            .header("date", &date)
            .header("authorization", authorization)
            .header("accept", "application/json")
            .header(REQUEST_ID_HEADER, uuid::Uuid::new_v4().simple().to_string())
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            let mut error = ApiError::from_response(status.as_u16(), &body, header(REQUEST_ID_HEADER));
            error.retry_after = header("retry-after").and_then(|v| v.trim().parse().ok());
            return Err(error.into());
        }

        let body = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).context("Failed to parse response JSON")?
        };

        Ok(Page {
            body,
            next_page: header(NEXT_PAGE_HEADER).filter(|t| !t.is_empty()),
        })
    }
}

/// Append URL-encoded query parameters
pub fn add_query_params(url: &str, params: &[(String, String)]) -> String {
    let query_parts: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();

    if query_parts.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query_parts.join("&"))
    } else {
        format!("{}?{}", url, query_parts.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_query_params() {
        let url = add_query_params(
            "https://iaas.us-ashburn-1.oraclecloud.com/20160918/instances",
            &[
                ("compartmentId".to_string(), "ocid1.tenancy.oc1..aaaa".to_string()),
                ("displayName".to_string(), "web server".to_string()),
            ],
        );
        assert_eq!(
            url,
            "https://iaas.us-ashburn-1.oraclecloud.com/20160918/instances?compartmentId=ocid1.tenancy.oc1..aaaa&displayName=web%20server"
        );
        assert_eq!(add_query_params("https://x/a?b=1", &[("c".into(), "2".into())]), "https://x/a?b=1&c=2");
        assert_eq!(add_query_params("https://x/a", &[]), "https://x/a");
    }

    #[test]
    fn test_sanitize_for_log_truncates() {
        let long = "x".repeat(500);
        let sanitized = sanitize_for_log(&long);
        assert!(sanitized.starts_with(&"x".repeat(200)));
        assert!(sanitized.contains("500 bytes total"));
        assert_eq!(sanitize_for_log("a\nb"), "ab");
    }
}
