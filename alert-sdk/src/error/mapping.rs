//! Error mapping for service-specific APIs
//!
//! Converts the error bodies of Sentry and Anthropic into the normalized
//! `ServiceError` taxonomy.

use reqwest::StatusCode;
use serde_json::Value;

use super::{ErrorContext, ServiceError};

/// Map an Anthropic API error body to a ServiceError.
///
/// Anthropic errors look like `{"type":"error","error":{"type":"...","message":"..."}}`.
pub fn map_anthropic_error(
    status: StatusCode,
    json: &Value,
    context: &mut ErrorContext,
) -> ServiceError {
    context.service = "anthropic".to_string();

    let error = json.get("error");
    if let Some(error_type) = error.and_then(|e| e.get("type")).and_then(|t| t.as_str()) {
        context.add("error_type", error_type);
    }

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown Anthropic error");

    match status.as_u16() {
        // 529 is Anthropic's "overloaded"
        529 => ServiceError::rate_limit(message),
        _ => map_status(status, message),
    }
}

/// Map a Sentry API error body to a ServiceError.
///
/// Sentry usually answers with `{"detail": "..."}`.
pub fn map_sentry_error(
    status: StatusCode,
    json: &Value,
    context: &mut ErrorContext,
) -> ServiceError {
    context.service = "sentry".to_string();

    let message = json
        .get("detail")
        .and_then(|d| d.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| json.to_string());

    map_status(status, &message)
}

/// Map a generic HTTP error to a ServiceError
pub fn map_http_error(status: StatusCode, body: &str, context: &mut ErrorContext) -> ServiceError {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        match context.service.as_str() {
            "anthropic" => return map_anthropic_error(status, &json, context),
            "sentry" => return map_sentry_error(status, &json, context),
            _ => {
                let message = json
                    .get("message")
                    .or_else(|| json.get("error"))
                    .and_then(|m| m.as_str())
                    .unwrap_or(body);
                return map_status(status, message);
            }
        }
    }

    let message = if body.is_empty() {
        status.to_string()
    } else if body.len() > 100 {
        format!("{}: {}", status, crate::util::truncate_string(body, 100))
    } else {
        format!("{}: {}", status, body)
    };

    map_status(status, &message)
}

fn map_status(status: StatusCode, message: &str) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED => ServiceError::authentication(message),
        StatusCode::FORBIDDEN => ServiceError::authorization(message),
        StatusCode::TOO_MANY_REQUESTS => ServiceError::rate_limit(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ServiceError::validation(message)
        }
        StatusCode::NOT_FOUND => ServiceError::not_found(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ServiceError::timeout(message),
        _ => ServiceError::service(message),
    }
}

/// Determine if an HTTP status code indicates a retryable error
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504 | 529)
}
