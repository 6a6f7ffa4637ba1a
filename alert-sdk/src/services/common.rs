//! Common utilities for service clients

use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::{ErrorContext, Result, ServiceError};

/// UserAgent structure for identifying the client to upstream services
#[derive(Debug, Clone)]
pub struct UserAgent {
    pub app_name: String,
    pub version: String,
    pub extra: Option<String>,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            app_name: "sentralert".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extra: Some("alert-sdk".to_string()),
        }
    }
}

impl UserAgent {
    /// Default agent tagged with the calling client
    pub fn for_client(client: &str) -> Self {
        Self {
            extra: Some(client.to_string()),
            ..Self::default()
        }
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_name, self.version)?;

        if let Some(ref extra) = self.extra {
            write!(f, " ({})", extra)?;
        }

        Ok(())
    }
}

/// Turn a non-success response into a normalized error
pub(crate) async fn parse_error_response(
    service_name: &str,
    endpoint: &str,
    request_id: &str,
    response: reqwest::Response,
) -> ServiceError {
    let status = response.status();
    let mut context = ErrorContext::for_service(service_name)
        .status_code(status.as_u16())
        .endpoint(endpoint)
        .request_id(request_id);

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("Failed to read error response: {}", e),
    };

    crate::error::mapping::map_http_error(status, &body, &mut context).with_context(context)
}

/// Decode a success body, or map the failure
pub(crate) async fn read_json<R: DeserializeOwned>(
    service_name: &str,
    endpoint: &str,
    request_id: &str,
    response: reqwest::Response,
) -> Result<R> {
    if !response.status().is_success() {
        return Err(parse_error_response(service_name, endpoint, request_id, response).await);
    }

    let body = response.text().await?;
    serde_json::from_str::<R>(&body).map_err(|e| {
        ServiceError::parsing(format!(
            "Failed to parse {} response: {} (body: {})",
            service_name,
            e,
            crate::util::truncate_string(&body, 200)
        ))
        .with_context(
            ErrorContext::for_service(service_name)
                .endpoint(endpoint)
                .request_id(request_id),
        )
    })
}

pub(crate) fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
