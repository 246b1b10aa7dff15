// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP transport for network power devices.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::TransportError;

/// HTTP client issuing JSON `GET` requests with a bounded retry policy.
///
/// Connection failures, timeouts and 5xx answers are retried; other error
/// statuses fail immediately.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use powerhub_lib::protocol::HttpClient;
///
/// # async fn example() -> Result<(), powerhub_lib::error::TransportError> {
/// let client = HttpClient::builder()
///     .timeout(Duration::from_secs(5))
///     .attempts(2)
///     .build()?;
/// let body = client.get_json("http://192.168.1.20/cm?cmnd=Power1").await?;
/// println!("{body}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    attempts: u32,
    retry_pause: Duration,
}

impl HttpClient {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
    /// Default number of attempts per request.
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    /// Default pause between attempts.
    pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(1);

    /// Creates a client with the default policy.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be created.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    /// Returns a builder for a client with a custom policy.
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Sends a `GET` request and parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the last failure once every attempt failed, or
    /// `TransportError::InvalidResponse` if the body is not JSON.
    pub async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Ok(body) => return Ok(serde_json::from_str(&body)?),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(e)) if attempt >= self.attempts => return Err(e),
                Err(Attempt::Retry(e)) => {
                    tracing::debug!(
                        url = %redact(url),
                        attempt,
                        error = %e,
                        "HTTP request failed, retrying"
                    );
                }
            }
            attempt += 1;
            tokio::time::sleep(self.retry_pause).await;
        }
    }

    async fn get_once(&self, url: &str) -> Result<String, Attempt> {
        tracing::debug!(url = %redact(url), "Sending HTTP request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Attempt::Retry(TransportError::Http(e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Attempt::Retry(TransportError::ConnectionFailed(format!(
                "HTTP {}",
                status.as_u16()
            ))));
        }
        if !status.is_success() {
            return Err(Attempt::Fatal(TransportError::Command(format!(
                "HTTP {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ))));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Attempt::Retry(TransportError::Http(e)))?;
        tracing::debug!(body = %body, "Received HTTP response");
        Ok(body)
    }
}

enum Attempt {
    Retry(TransportError),
    Fatal(TransportError),
}

/// Strips the query string, which may carry credentials.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    attempts: u32,
    retry_pause: Duration,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: HttpClient::DEFAULT_TIMEOUT,
            attempts: HttpClient::DEFAULT_ATTEMPTS,
            retry_pause: HttpClient::DEFAULT_RETRY_PAUSE,
        }
    }
}

impl HttpClientBuilder {
    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of attempts (at least one).
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Sets the pause between attempts.
    #[must_use]
    pub fn retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be created.
    pub fn build(self) -> Result<HttpClient, TransportError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(TransportError::Http)?;
        Ok(HttpClient {
            client,
            attempts: self.attempts,
            retry_pause: self.retry_pause,
        })
    }
}
