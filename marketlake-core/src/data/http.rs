//! Blocking HTTP plumbing shared by the REST adapters.

use super::provider::FetchError;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_client(user_agent: &str) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(user_agent)
        .build()
        .map_err(|e| FetchError::Permanent(format!("failed to build HTTP client: {e}")))
}

/// 408, 429, and 5xx are worth retrying; any other non-success is not.
pub fn classify_status(status: StatusCode, context: &str) -> FetchError {
    let msg = format!("HTTP {status} for {context}");
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FetchError::Transient(msg)
    } else {
        FetchError::Permanent(msg)
    }
}

pub fn classify_send_error(err: &reqwest::Error, context: &str) -> FetchError {
    let msg = format!("request for {context} failed: {err}");
    if err.is_connect() || err.is_timeout() || err.is_request() {
        FetchError::Transient(msg)
    } else {
        FetchError::Permanent(msg)
    }
}

/// Send once and decode a JSON body. Undecodable bodies are transient.
pub fn get_json<T: DeserializeOwned>(request: RequestBuilder, context: &str) -> Result<T, FetchError> {
    let resp = request
        .send()
        .map_err(|e| classify_send_error(&e, context))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(classify_status(status, context));
    }
    let body = resp
        .text()
        .map_err(|e| classify_send_error(&e, context))?;
    serde_json::from_str(&body).map_err(|e| {
        FetchError::Transient(format!("malformed response for {context}: {e}"))
    })
}
