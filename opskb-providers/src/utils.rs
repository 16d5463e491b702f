//! Shared helpers for HTTP providers

use crate::{Error, ProviderError, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;

/// Map a non-success HTTP status to a provider error
///
/// Rate limits, timeouts and server errors are transient; every other
/// client error means this input will never be accepted.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status, truncate(body, 512));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ProviderError::Unavailable(message)
    } else {
        ProviderError::Rejected(message)
    }
}

/// Transport failures are always worth a retry
pub fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Unavailable(format!("request failed: {}", err))
}

/// JSON headers with a bearer token
pub fn bearer_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if !api_key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| Error::config(format!("Invalid API key header: {}", e)))?,
        );
    }
    Ok(headers)
}

/// Read an API key from the environment
pub fn env_api_key(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| Error::config(format!("{} not set", var)))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
