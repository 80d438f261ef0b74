//! Response status handling shared by the HTTP adapters.

use parley_tool_runtime::provider::ConnectionError;
use serde_json::Value;

const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

pub(crate) fn network(err: reqwest::Error) -> ConnectionError {
    ConnectionError::Network(err.to_string())
}

/// Pass 2xx responses through; turn everything else into a [`ConnectionError`].
///
/// 429s that mention quota stay as `Api` errors so callers can tell an
/// exhausted balance from a transient rate limit.
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, ConnectionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);

    Err(match status.as_u16() {
        401 => ConnectionError::Auth,
        429 if !message.to_lowercase().contains("quota") => ConnectionError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        code => ConnectionError::Api {
            status: code,
            message,
        },
    })
}

/// Best human-readable message in a provider error body.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let error = &parsed["error"];
    let message = error["message"]
        .as_str()
        .or_else(|| error.as_str())
        .or_else(|| parsed["message"].as_str());
    let kind = error["type"].as_str().or_else(|| error["code"].as_str());
    match (kind, message) {
        (Some(kind), Some(message)) => format!("{}: {}", kind, message),
        (None, Some(message)) => message.to_string(),
        _ => body.trim().to_string(),
    }
}
