//! Error taxonomy for the client.

use std::fmt;

use crate::envelope::DecodeError;

/// Errors returned by [`Client`](crate::Client) operations.
#[derive(Debug)]
pub enum ClientError {
    /// Login was attempted without an email or password. Holds the missing field.
    MissingCredentials(&'static str),
    /// The configured endpoint (or a path joined onto it) is not a valid URL.
    InvalidEndpoint(String),
    /// The request never produced a response (DNS, connection refused, body read failure, ...).
    Transport(anyhow::Error),
    /// The response body does not follow the `{code, message, error, data}` shape.
    MalformedEnvelope { status: u16, reason: String },
    /// The envelope reported a non-success code.
    Remote {
        status: u16,
        code: String,
        message: String,
    },
    /// Login succeeded at the envelope level but carried no usable token.
    MalformedLoginResponse(String),
    /// A request body could not be serialized, or a payload did not match the caller's type.
    Json(serde_json::Error),
    /// The retry policy allows zero attempts, so nothing was sent.
    NoAttempts,
    /// The configured deadline elapsed before any attempt succeeded.
    DeadlineExceeded,
}

impl ClientError {
    pub(crate) fn from_decode(status: u16, error: DecodeError) -> Self {
        match error {
            DecodeError::Malformed(reason) => ClientError::MalformedEnvelope { status, reason },
            DecodeError::Remote { code, message } => ClientError::Remote {
                status,
                code,
                message,
            },
        }
    }

    /// HTTP status of the response that produced this error, if any response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::MalformedEnvelope { status, .. } | ClientError::Remote { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Transport failures, 5xx, 408 and 429 are retryable. Other 4xx responses and
    /// remote errors reported on a non-5xx response are not, and neither are
    /// local precondition failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::MalformedEnvelope { status, .. } => !is_permanent_status(*status),
            ClientError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::MissingCredentials(field) => write!(f, "{} not set", field),
            ClientError::InvalidEndpoint(msg) => write!(f, "Invalid endpoint: {}", msg),
            ClientError::Transport(e) => write!(f, "Transport error: {:#}", e),
            ClientError::MalformedEnvelope { status, reason } => {
                write!(f, "Malformed response (HTTP {}): {}", status, reason)
            }
            // The service message is shown verbatim.
            ClientError::Remote { message, .. } => write!(f, "{}", message),
            ClientError::MalformedLoginResponse(msg) => {
                write!(f, "Malformed login response: {}", msg)
            }
            ClientError::Json(e) => write!(f, "JSON error: {}", e),
            ClientError::NoAttempts => {
                write!(f, "No request attempted: retry limit is 0")
            }
            ClientError::DeadlineExceeded => write!(f, "Deadline exceeded"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport(e) => Some(&**e),
            ClientError::Json(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_is_service_message() {
        let err = ClientError::Remote {
            status: 200,
            code: "1001".to_string(),
            message: "wrong password".to_string(),
        };
        assert_eq!(err.to_string(), "wrong password");
        assert_eq!(err.status(), Some(200));
    }

    #[test]
    fn test_missing_credentials_display() {
        let err = ClientError::MissingCredentials("password");
        assert_eq!(err.to_string(), "password not set");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let err = ClientError::Transport(anyhow::anyhow!("connection refused"));
        assert!(err.to_string().contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_retryable() {
        assert!(ClientError::Transport(anyhow::anyhow!("dns")).is_retryable());

        let server_error = ClientError::MalformedEnvelope {
            status: 502,
            reason: "expected value".to_string(),
        };
        assert!(server_error.is_retryable());

        let not_found = ClientError::MalformedEnvelope {
            status: 404,
            reason: "expected value".to_string(),
        };
        assert!(!not_found.is_retryable());

        let throttled = ClientError::MalformedEnvelope {
            status: 429,
            reason: "expected value".to_string(),
        };
        assert!(throttled.is_retryable());

        let rejected = ClientError::Remote {
            status: 200,
            code: "1".to_string(),
            message: "bad".to_string(),
        };
        assert!(!rejected.is_retryable());

        let unavailable = ClientError::Remote {
            status: 503,
            code: "1".to_string(),
            message: "busy".to_string(),
        };
        assert!(unavailable.is_retryable());

        assert!(!ClientError::MissingCredentials("email").is_retryable());
        assert!(!ClientError::NoAttempts.is_retryable());
    }
}
