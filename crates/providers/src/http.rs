//! HTTP response classification shared by the HTTP-based providers.

use reqwest::{Response, StatusCode};

use crate::ProviderError;

/// Whether a non-success status is worth retrying: 408, 429 and 5xx are,
/// every other 4xx is a permanent rejection.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Map a transport-level `reqwest` failure. Everything on the wire is transient.
pub fn transport_error(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transient(format!("{provider} request timed out"))
    } else {
        ProviderError::Transient(format!("{provider} request failed: {err}"))
    }
}

/// Pass through 2xx responses, classify everything else.
pub async fn check_response(provider: &str, resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let detail = format!("{provider} API error {status}: {}", truncate(&body, 300));

    tracing::debug!(provider, status = status.as_u16(), "Provider returned error status");

    if is_retryable_status(status) {
        Err(ProviderError::Transient(detail))
    } else {
        Err(ProviderError::Rejected(detail))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
