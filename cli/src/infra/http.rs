//! Shared reqwest plumbing for the provider REST adapters.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

/// Longest error body kept in an error message.
const ERROR_PREVIEW_CHARS: usize = 500;

/// Build a client whose every request is bounded by `timeout`.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("devmachine/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to create HTTP client")
}

/// Fail on non-2xx responses, keeping a preview of the body.
///
/// # Errors
///
/// Returns `HTTP <status>: <body preview>` for unsuccessful responses.
pub async fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read response body".to_string());
    let preview: String = body.chars().take(ERROR_PREVIEW_CHARS).collect();
    anyhow::bail!("{what}: HTTP {}: {preview}", status.as_u16())
}

/// `check`, then decode the JSON body.
///
/// # Errors
///
/// Fails on non-2xx responses or undecodable bodies.
pub async fn json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    check(response, what)
        .await?
        .json::<T>()
        .await
        .with_context(|| format!("{what}: decoding response"))
}

/// Whether a response means the resource does not exist.
#[must_use]
pub fn is_not_found(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}
