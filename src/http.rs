//! Shared blocking HTTP plumbing for the remote adapters.
//!
//! The ledger gateway, the embedding service, Qdrant and the Prometheus push
//! gateway all speak JSON over HTTP. Requests are never retried here: the
//! ledger in particular must not see a write twice.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default connect timeout.
const CONNECT_TIMEOUT_MS: u64 = 3_000;

/// Builds a blocking client with a request timeout (0 disables it).
pub fn build_http_client(timeout_ms: u64) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS));
    if timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Sends a request and decodes a JSON body from a 2xx response.
///
/// Failures are logged with `service` and mapped to
/// [`Error::OperationFailed`] with `operation` as the name.
pub fn send_json<T: DeserializeOwned>(
    service: &'static str,
    operation: &'static str,
    request: reqwest::blocking::RequestBuilder,
) -> Result<T> {
    let response = send(service, operation, request)?;
    response.json::<T>().map_err(|e| {
        tracing::error!(service, operation, error = %e, "Failed to parse response body");
        Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("invalid response body: {e}"),
        }
    })
}

/// Sends a request and checks for a 2xx status.
pub fn send(
    service: &'static str,
    operation: &'static str,
    request: reqwest::blocking::RequestBuilder,
) -> Result<reqwest::blocking::Response> {
    let response = request.send().map_err(|e| request_error(service, operation, &e))?;
    check_status(service, operation, response)
}

fn request_error(service: &'static str, operation: &'static str, e: &reqwest::Error) -> Error {
    let error_kind = error_kind(e);
    tracing::error!(
        service,
        operation,
        error = %e,
        error_kind,
        is_timeout = e.is_timeout(),
        is_connect = e.is_connect(),
        "HTTP request failed"
    );
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{error_kind} error: {e}"),
    }
}

fn check_status(
    service: &'static str,
    operation: &'static str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        tracing::error!(service, operation, status = %status, "Service returned error status");
        return Err(Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("status {status}: {body}"),
        });
    }
    Ok(response)
}

/// Like [`send_json`], but a 404 response yields `None`.
pub fn send_optional_json<T: DeserializeOwned>(
    service: &'static str,
    operation: &'static str,
    request: reqwest::blocking::RequestBuilder,
) -> Result<Option<T>> {
    let response = request.send().map_err(|e| request_error(service, operation, &e))?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = check_status(service, operation, response)?;
    response.json::<T>().map(Some).map_err(|e| {
        tracing::error!(service, operation, error = %e, "Failed to parse response body");
        Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("invalid response body: {e}"),
        }
    })
}

fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else if e.is_decode() {
        "decode"
    } else {
        "unknown"
    }
}

/// Joins a base URL and a path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
