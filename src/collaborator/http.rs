use std::time::Duration;

use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;

use crate::error::Error;

pub(super) fn build_client(timeout: Duration) -> Result<ReqwestClient, Error> {
    ReqwestClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {}", e),
                Some(Box::new(e)),
            )
        })
}

/// Maps a transport-level reqwest failure onto the error taxonomy.
pub(super) fn send_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::timeout(
            format!("Request timed out: {}", e),
            Some(timeout.as_secs_f64()),
        )
    } else if e.is_connect() {
        Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
    } else {
        Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
    }
}

/// Converts a non-success response into an error.
///
/// Google APIs report failures as `{"error": {"code", "message", "status"}}`; anything else is
/// passed through as the raw body.
pub(super) async fn process_error_response(response: Response) -> Error {
    let status_code = response.status().as_u16();

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.parse::<u64>().ok());

    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
        status: Option<String>,
    }

    let error_body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return Error::http_client(
                format!("Failed to read error response: {}", e),
                Some(Box::new(e)),
            );
        }
    };

    let detail = serde_json::from_str::<ErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error);
    let error_type = detail.as_ref().and_then(|d| d.status.clone());
    let error_message = detail
        .and_then(|d| d.message)
        .unwrap_or(error_body);

    match status_code {
        401 | 403 => Error::authentication(error_message),
        408 => Error::timeout(error_message, None),
        429 => Error::rate_limit(error_message, retry_after),
        502..=504 => Error::service_unavailable(error_message, retry_after),
        _ => Error::api(status_code, error_type, error_message),
    }
}
