//! Authenticated client for the service's JSON API.
//!
//! # Structure
//!
//! - `request` - Request descriptor and decoded response
//! - `login` - Account login and session token handling

mod login;
mod request;

use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::envelope;
use crate::error::ClientError;
use crate::http::{ReqwestTransport, RetryPolicy, Transport};

pub use login::LOGIN_PATH;
pub use request::{RequestDescriptor, Response};

/// Endpoint used when the configuration does not name one.
pub const DEFAULT_ENDPOINT: &str = "https://bohrium.dp.tech";

/// Client identification header sent with every request.
pub const CLIENT_HEADER: &str = "bohr-client";

/// Pinned value of [`CLIENT_HEADER`].
pub const CLIENT_VERSION: &str = "utility:1.2.18";

/// Settings for [`Client::new`]. Unset fields fall back to defaults at construction.
#[derive(Clone, Default)]
pub struct ClientConfig {
    pub email: String,
    pub password: String,
    /// Base URL, defaults to [`DEFAULT_ENDPOINT`].
    pub endpoint: Option<String>,
    /// Defaults to zero attempts.
    pub retry: RetryPolicy,
    /// Defaults to a [`ReqwestTransport`] honouring `timeout`.
    pub transport: Option<Arc<dyn Transport>>,
    /// Per-call timeout for the default transport.
    pub timeout: Option<Duration>,
    /// Bound on one request across all of its attempts.
    pub deadline: Option<Duration>,
}

impl ClientConfig {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .field("transport", &self.transport.as_ref().map(|_| "<custom>"))
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// A session against one service endpoint.
///
/// The bearer token obtained by [`Client::login`] is held behind a lock, so a
/// `Client` can be shared (e.g. in an `Arc`) between tasks: requests read the
/// token, login replaces it.
pub struct Client {
    endpoint: Url,
    email: String,
    password: String,
    retry: RetryPolicy,
    deadline: Option<Duration>,
    transport: Arc<dyn Transport>,
    /// Ready-made `Authorization` value, set by login.
    token: RwLock<Option<HeaderValue>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = config
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(ClientError::InvalidEndpoint(format!(
                "{}: not a base URL",
                endpoint
            )));
        }
        if endpoint.query().is_some() || endpoint.fragment().is_some() {
            return Err(ClientError::InvalidEndpoint(format!(
                "{}: must not carry a query or fragment",
                endpoint
            )));
        }

        let transport: Arc<dyn Transport> = match config.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::with_timeout(config.timeout).map_err(ClientError::Transport)?,
            ),
        };

        Ok(Self {
            endpoint,
            email: config.email,
            password: config.password,
            retry: config.retry,
            deadline: config.deadline,
            transport,
            token: RwLock::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Sends `method path` with the optional body, extra headers and query parameters,
    /// retrying according to the configured policy, and returns the unwrapped payload.
    ///
    /// `headers` is cloned; the caller's map is never modified.
    #[tracing::instrument(skip(self, body, headers))]
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
        headers: Option<&HeaderMap>,
        params: &[(&str, &str)],
    ) -> Result<Response, ClientError> {
        self.dispatch(&method, path, body, headers, params, true)
            .await
    }

    /// Same as [`Client::execute`], taking a prepared [`RequestDescriptor`].
    pub async fn send(&self, request: &RequestDescriptor) -> Result<Response, ClientError> {
        let params: Vec<(&str, &str)> = request
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.execute(
            request.method.clone(),
            &request.path,
            request.body.as_deref(),
            Some(&request.headers),
            &params,
        )
        .await
    }

    /// GETs `path` and decodes the payload into `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        self.execute(Method::GET, path, None, None, params)
            .await?
            .json()
    }

    /// POSTs `body` as JSON to `path` and decodes the payload into `T`.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let request = RequestDescriptor::new(Method::POST, path).json(body)?;
        self.send(&request).await?.json()
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&[u8]>,
        headers: Option<&HeaderMap>,
        params: &[(&str, &str)],
        authenticate: bool,
    ) -> Result<Response, ClientError> {
        let url = self.build_url(path, params)?;
        let headers = self.build_headers(headers, authenticate).await;

        let attempts = self.retry_loop(method, &url, &headers, body);
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, attempts)
                .await
                .map_err(|_| ClientError::DeadlineExceeded)?,
            None => attempts.await,
        }
    }

    /// Joins `path` onto the endpoint and appends `params` as a query string.
    /// No `?` is added when `params` is empty.
    fn build_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, ClientError> {
        let joined = format!(
            "{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{}: {}", joined, e)))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn build_headers(&self, headers: Option<&HeaderMap>, authenticate: bool) -> HeaderMap {
        let mut headers = headers.cloned().unwrap_or_default();

        if authenticate {
            if let Some(authorization) = self.token.read().await.clone() {
                headers.insert(AUTHORIZATION, authorization);
            }
        }

        headers.insert(
            HeaderName::from_static(CLIENT_HEADER),
            HeaderValue::from_static(CLIENT_VERSION),
        );
        headers
    }

    async fn retry_loop(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<Response, ClientError> {
        let max_attempts = self.retry.max_attempts;

        for attempt in 1..=max_attempts {
            debug!("{} {}: attempt {}/{}", method, url.path(), attempt, max_attempts);

            let error = match self.attempt(method, url, headers, body).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !self.retry.should_retry(attempt, &error) {
                debug!("{} {}: giving up after attempt {}: {}", method, url.path(), attempt, error);
                return Err(error);
            }

            match self.retry.delay_after(attempt) {
                Some(delay) => {
                    warn!(
                        "{} {}: attempt {}/{} failed ({}), retrying in {}ms...",
                        method,
                        url.path(),
                        attempt,
                        max_attempts,
                        error,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                None => warn!(
                    "{} {}: attempt {}/{} failed ({}), retrying...",
                    method,
                    url.path(),
                    attempt,
                    max_attempts,
                    error
                ),
            }
        }

        Err(ClientError::NoAttempts)
    }

    /// One build-send-decode trial. The body is re-wrapped on every call.
    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<Response, ClientError> {
        let mut request = reqwest::Request::new(method.clone(), url.clone());
        *request.headers_mut() = headers.clone();
        if let Some(body) = body {
            *request.body_mut() = Some(Body::from(body.to_vec()));
        }

        let response = self
            .transport
            .send(request)
            .await
            .map_err(ClientError::Transport)?;

        let payload = envelope::decode(&response.body)
            .map_err(|e| ClientError::from_decode(response.status, e))?;

        Ok(Response {
            status: response.status,
            payload,
        })
    }
}
