//! The seam between the request pipeline and the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Request};
use std::time::Duration;

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends one prepared request and reads the whole response body.
///
/// An `Err` means no usable response was obtained (DNS failure, refused
/// connection, interrupted body, ...). Any HTTP status, including 4xx/5xx,
/// comes back as `Ok`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<HttpResponse>;
}

/// [`Transport`] backed by a reqwest [`Client`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps an existing reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a Client with the crate's user agent and an optional per-call timeout.
    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!("lbg-rs/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<HttpResponse> {
        debug!("{}", request_line(&request));

        let response = self
            .client
            .execute(request)
            .await
            .context("Failed to send request")?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?
            .to_vec();

        debug!("HTTP {} ({} bytes)", status, body.len());

        Ok(HttpResponse { status, body })
    }
}

/// Method and path only; the query can carry caller data.
fn request_line(request: &Request) -> String {
    format!("{} {}", request.method(), request.url().path())
}
