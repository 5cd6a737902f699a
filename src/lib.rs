//! Client for a JSON API that wraps every response in a `{code, message, error, data}`
//! envelope and authenticates with a `jwt` bearer token.
//!
//! ```no_run
//! use lbg::{Client, ClientConfig, RetryPolicy};
//! use reqwest::Method;
//!
//! # async fn run() -> Result<(), lbg::ClientError> {
//! let client = Client::new(
//!     ClientConfig::new("user@example.com", "secret").with_retry(RetryPolicy::attempts(3)),
//! )?;
//! client.login().await?;
//! let response = client
//!     .execute(Method::GET, "/account/info", None, None, &[])
//!     .await?;
//! let info: serde_json::Value = response.json()?;
//! # let _ = info;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod envelope;
pub mod error;
pub mod http;

pub use client::{
    CLIENT_HEADER, CLIENT_VERSION, Client, ClientConfig, DEFAULT_ENDPOINT, LOGIN_PATH,
    RequestDescriptor, Response,
};
pub use error::ClientError;
pub use http::{Backoff, HttpResponse, ReqwestTransport, RetryPolicy, Transport};
