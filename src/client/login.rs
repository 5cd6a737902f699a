use log::info;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use super::Client;
use crate::error::ClientError;

/// Path of the login endpoint, relative to the configured endpoint.
pub const LOGIN_PATH: &str = "/account/login";

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

impl Client {
    /// Authenticates with the configured email and password and stores the
    /// returned token; later requests carry it as `Authorization: jwt <token>`.
    ///
    /// Calling it again re-authenticates and replaces the token.
    #[tracing::instrument(skip(self), fields(email = %self.email))]
    pub async fn login(&self) -> Result<(), ClientError> {
        if self.email.is_empty() {
            return Err(ClientError::MissingCredentials("email"));
        }
        if self.password.is_empty() {
            return Err(ClientError::MissingCredentials("password"));
        }

        let body = serde_json::to_vec(&LoginRequest {
            email: &self.email,
            password: &self.password,
        })
        .map_err(ClientError::Json)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .dispatch(&Method::POST, LOGIN_PATH, Some(&body), Some(&headers), &[], false)
            .await?;

        let authorization = authorization_value(&response.payload)?;
        *self.token.write().await = Some(authorization);

        info!("Logged in as {}", self.email);
        Ok(())
    }

    /// Forgets the stored token; later requests go out unauthenticated.
    pub async fn logout(&self) {
        *self.token.write().await = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }
}

/// Reads the token from the login payload and turns it into a ready
/// `Authorization: jwt <token>` value, so a token that cannot be sent is
/// rejected at login time.
fn authorization_value(payload: &[u8]) -> Result<HeaderValue, ClientError> {
    let token = extract_token(payload)?;
    let mut value = HeaderValue::from_str(&format!("jwt {}", token)).map_err(|_| {
        ClientError::MalformedLoginResponse("token is not a valid header value".to_string())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

fn extract_token(payload: &[u8]) -> Result<String, ClientError> {
    if payload.is_empty() {
        return Err(ClientError::MalformedLoginResponse(
            "response has no data".to_string(),
        ));
    }
    let data: Value = serde_json::from_slice(payload)
        .map_err(|e| ClientError::MalformedLoginResponse(e.to_string()))?;

    match data.get("token") {
        Some(Value::String(token)) if !token.is_empty() => Ok(token.clone()),
        Some(Value::String(_)) => Err(ClientError::MalformedLoginResponse(
            "token is empty".to_string(),
        )),
        Some(_) => Err(ClientError::MalformedLoginResponse(
            "token is not a string".to_string(),
        )),
        None => Err(ClientError::MalformedLoginResponse(
            "missing field `token`".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::http::{HttpResponse, MockTransport, RetryPolicy};
    use reqwest::header::AUTHORIZATION;
    use std::sync::Arc;

    fn ok(body: &str) -> anyhow::Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
        })
    }

    fn client(email: &str, password: &str, transport: MockTransport) -> Client {
        Client::new(
            ClientConfig::new(email, password)
                .with_endpoint("https://api.example.com")
                .with_retry(RetryPolicy::attempts(1))
                .with_transport(Arc::new(transport)),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(br#"{"token":"T1"}"#).unwrap(), "T1");
        assert!(matches!(
            extract_token(b""),
            Err(ClientError::MalformedLoginResponse(_))
        ));
        assert!(matches!(
            extract_token(br#"{"user_id":1}"#),
            Err(ClientError::MalformedLoginResponse(_))
        ));
        assert!(matches!(
            extract_token(br#"{"token":42}"#),
            Err(ClientError::MalformedLoginResponse(_))
        ));
        assert!(matches!(
            extract_token(br#"{"token":""}"#),
            Err(ClientError::MalformedLoginResponse(_))
        ));
        assert!(matches!(
            extract_token(b"null"),
            Err(ClientError::MalformedLoginResponse(_))
        ));
    }

    #[test]
    fn test_authorization_value() {
        let value = authorization_value(br#"{"token":"T1"}"#).unwrap();
        assert_eq!(value, "jwt T1");
        assert!(value.is_sensitive());

        assert!(matches!(
            authorization_value(br#"{"token":"T\n1"}"#),
            Err(ClientError::MalformedLoginResponse(_))
        ));
        assert!(matches!(
            authorization_value(br#"{"token":"T\u00071"}"#),
            Err(ClientError::MalformedLoginResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_login_rejects_token_with_control_characters() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| ok(r#"{"code":"0","data":{"token":"T\n1"}}"#));

        let client = client("a@b.com", "pw", transport);
        let err = client.login().await.unwrap_err();

        assert!(matches!(err, ClientError::MalformedLoginResponse(_)));
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_missing_password_skips_transport() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let client = client("a@b.com", "", transport);
        let err = client.login().await.unwrap_err();

        assert!(matches!(err, ClientError::MissingCredentials("password")));
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_missing_email_skips_transport() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let client = client("", "pw", transport);
        let err = client.login().await.unwrap_err();

        assert!(matches!(err, ClientError::MissingCredentials("email")));
    }

    #[test_log::test(tokio::test)]
    async fn test_login_stores_token_for_later_requests() {
        let mut seq = mockall::Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                req.method() == Method::POST
                    && req.url().path() == "/account/login"
                    && req.headers().get(AUTHORIZATION).is_none()
                    && req.body().and_then(|b| b.as_bytes())
                        == Some(&br#"{"email":"a@b.com","password":"pw"}"#[..])
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(r#"{"code":"0","data":{"token":"T1"}}"#));
        transport
            .expect_send()
            .withf(|req| {
                req.headers().get(AUTHORIZATION).map(|v| v.as_bytes()) == Some(&b"jwt T1"[..])
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(r#"{"code":"0","data":{}}"#));

        let client = client("a@b.com", "pw", transport);
        client.login().await.unwrap();
        assert!(client.is_authenticated().await);

        client
            .execute(Method::GET, "/account/info", None, None, &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relogin_replaces_token_and_never_sends_old_one() {
        let mut seq = mockall::Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(r#"{"code":"0","data":{"token":"T1"}}"#));
        transport
            .expect_send()
            .withf(|req| req.headers().get(AUTHORIZATION).is_none())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(r#"{"code":"0","data":{"token":"T2"}}"#));
        transport
            .expect_send()
            .withf(|req| {
                req.headers().get(AUTHORIZATION).map(|v| v.as_bytes()) == Some(&b"jwt T2"[..])
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(r#"{"code":"0"}"#));

        let client = client("a@b.com", "pw", transport);
        client.login().await.unwrap();
        client.login().await.unwrap();
        client
            .execute(Method::GET, "/ping", None, None, &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_remote_error_keeps_session_unauthenticated() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| ok(r#"{"code":"2001","message":"invalid password"}"#));

        let client = client("a@b.com", "wrong", transport);
        let err = client.login().await.unwrap_err();

        assert_eq!(err.to_string(), "invalid password");
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_without_token_is_malformed() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| ok(r#"{"code":"0","data":{"user":"a"}}"#));

        let client = client("a@b.com", "pw", transport);
        let err = client.login().await.unwrap_err();

        assert!(matches!(err, ClientError::MalformedLoginResponse(_)));
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_logout_clears_token() {
        let mut seq = mockall::Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(r#"{"code":"0","data":{"token":"T1"}}"#));
        transport
            .expect_send()
            .withf(|req| req.headers().get(AUTHORIZATION).is_none())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(r#"{"code":"0"}"#));

        let client = client("a@b.com", "pw", transport);
        client.login().await.unwrap();
        client.logout().await;
        assert!(!client.is_authenticated().await);

        client
            .execute(Method::GET, "/ping", None, None, &[])
            .await
            .unwrap();
    }
}
