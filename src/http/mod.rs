//! HTTP transport and retry policy.

mod retry;
mod transport;

#[cfg(test)]
pub use transport::MockTransport;
pub use retry::{Backoff, RetryPolicy};
pub use transport::{HttpResponse, ReqwestTransport, Transport};
