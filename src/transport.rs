//! HTTP transport collaborator
//!
//! The engine only sees [`HttpTransport`]; [`ReqwestTransport`] is the
//! production implementation, tests plug in scripted fakes.

use crate::config::IsapiConfig;
use crate::error::TransportFailureKind;
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// One HTTP exchange as handed to the transport
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// Raw device answer; the body is opaque to the engine
#[derive(Debug, Clone)]
pub struct DeviceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl DeviceResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// All `WWW-Authenticate` values that are valid header text
    pub fn www_authenticate(&self) -> Vec<&str> {
        self.headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Short body excerpt for error messages
    pub(crate) fn snippet(&self) -> String {
        const MAX: usize = 256;
        let text = self.text();
        let text = text.trim();
        match text.char_indices().nth(MAX) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.to_string(),
        }
    }
}

/// The request never produced an HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn into_error(self, retried: bool) -> Error {
        Error::Transport {
            status: None,
            kind: Some(self.kind),
            message: self.message,
            retried,
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one HTTP exchange. Any status code is a successful send.
    async fn send(&self, request: DeviceRequest) -> std::result::Result<DeviceResponse, TransportFailure>;
}

/// reqwest-backed transport sharing one connection pool across devices
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &IsapiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(config.user_agent.as_str())
            .timeout(config.default_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn classify(e: &reqwest::Error) -> TransportFailureKind {
    if e.is_timeout() {
        TransportFailureKind::Timeout
    } else if e.is_connect() {
        TransportFailureKind::Connect
    } else {
        TransportFailureKind::Other
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: DeviceRequest) -> std::result::Result<DeviceResponse, TransportFailure> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(request.timeout);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportFailure::new(classify(&e), e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::new(classify(&e), e.to_string()))?;

        Ok(DeviceResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_www_authenticate_collects_all_values() {
        let mut response = DeviceResponse::new(StatusCode::UNAUTHORIZED, "");
        response
            .headers
            .append(WWW_AUTHENTICATE, HeaderValue::from_static(r#"Basic realm="DS""#));
        response.headers.append(
            WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Digest realm="DS", nonce="abc", qop="auth""#),
        );

        let values = response.www_authenticate();
        assert_eq!(values.len(), 2);
        assert!(values[1].starts_with("Digest"));
    }

    #[test]
    fn test_snippet_truncates() {
        let response = DeviceResponse::new(StatusCode::BAD_REQUEST, "x".repeat(1000));
        let snippet = response.snippet();
        assert_eq!(snippet.len(), 256 + 3);
        assert!(snippet.ends_with("..."));

        let response = DeviceResponse::new(StatusCode::BAD_REQUEST, "  short  ");
        assert_eq!(response.snippet(), "short");
    }

    #[test]
    fn test_json_body() {
        let response = DeviceResponse::new(StatusCode::OK, r#"{"security":"S1","identityKey":"I1"}"#);
        let v: serde_json::Value = response.json().unwrap();
        assert_eq!(v["security"], "S1");

        let response = DeviceResponse::new(StatusCode::OK, "<xml/>");
        assert!(matches!(response.json::<serde_json::Value>(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_failure_into_error() {
        let err = TransportFailure::new(TransportFailureKind::Timeout, "deadline").into_error(true);
        assert!(err.is_timeout());
        assert!(matches!(err, Error::Transport { retried: true, status: None, .. }));
    }
}
