//! ISAPI request engine
//!
//! Issues one HTTP call against a device and answers a single Digest
//! challenge if the device asks for one. The retry budget is exactly one:
//! a second 401, a timeout or a 5xx is handed back to the caller, who owns
//! any further retry policy.

use crate::config::IsapiConfig;
use crate::credentials::SecretDecryptor;
use crate::device::{request_uri, DeviceTarget};
use crate::digest::{is_digest_scheme, DigestChallenge, DigestContext};
use crate::transport::{DeviceRequest, DeviceResponse, HttpTransport, ReqwestTransport};
use crate::{Error, Result};
use http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Method, path and payload of one engine call
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    /// Path and query, e.g. `/ISAPI/AccessControl/UserInfo/Record?format=json`
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub headers: HeaderMap,
    /// Overrides [`IsapiConfig::default_timeout`] for this call
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and set `Content-Type: application/json`
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = Some(serde_json::to_vec(value)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// XML payload, as most non-JSON ISAPI endpoints expect
    pub fn with_xml(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into().into_bytes());
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid value for header {}: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Request engine shared by every ISAPI manager
#[derive(Clone)]
pub struct IsapiClient {
    transport: Arc<dyn HttpTransport>,
    decryptor: Arc<dyn SecretDecryptor>,
    config: IsapiConfig,
}

impl IsapiClient {
    pub fn new(
        config: IsapiConfig,
        transport: Arc<dyn HttpTransport>,
        decryptor: Arc<dyn SecretDecryptor>,
    ) -> Self {
        Self {
            transport,
            decryptor,
            config,
        }
    }

    /// Engine over a reqwest transport built from `config`
    pub fn with_reqwest(config: IsapiConfig, decryptor: Arc<dyn SecretDecryptor>) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::new(config, transport, decryptor))
    }

    pub fn config(&self) -> &IsapiConfig {
        &self.config
    }

    /// Execute one call, answering a Digest challenge at most once
    ///
    /// # Errors
    /// - [`Error::Challenge`] on a 401 without a usable Digest challenge (no retry)
    /// - [`Error::Decryption`] if the stored credential cannot be decrypted
    /// - [`Error::Authentication`] if the digest-authenticated attempt is rejected
    /// - [`Error::Transport`] for network failures, timeouts and other non-2xx statuses
    pub async fn request(&self, device: &DeviceTarget, options: RequestOptions) -> Result<DeviceResponse> {
        let uri = request_uri(&options.path);
        let request = DeviceRequest {
            method: options.method,
            url: device.url_for(&uri)?,
            headers: options.headers,
            body: options.body,
            timeout: options.timeout.unwrap_or(self.config.default_timeout),
        };

        debug!(
            device_id = %device.device_id,
            method = %request.method,
            path = %uri,
            "Sending ISAPI request"
        );

        let response = self.transport.send(request.clone()).await.map_err(|failure| {
            warn!(
                device_id = %device.device_id,
                kind = %failure.kind,
                error = %failure.message,
                "ISAPI request failed"
            );
            failure.into_error(false)
        })?;

        if response.is_success() {
            return Ok(response);
        }

        if response.status != StatusCode::UNAUTHORIZED {
            debug!(
                device_id = %device.device_id,
                status = response.status.as_u16(),
                "ISAPI request returned error status"
            );
            return Err(Error::status(response.status.as_u16(), describe(&response)));
        }

        let challenge = select_challenge(&response).map_err(|e| {
            warn!(device_id = %device.device_id, error = %e, "Rejecting 401 without usable Digest challenge");
            e
        })?;

        let retry = self.authorize(device, request, &uri, &challenge)?;

        debug!(
            device_id = %device.device_id,
            realm = %challenge.realm,
            stale = challenge.stale,
            "Retrying ISAPI request with digest credentials"
        );

        let response = self
            .transport
            .send(retry)
            .await
            .map_err(|failure| failure.into_error(true))?;

        if response.is_success() {
            return Ok(response);
        }

        warn!(
            device_id = %device.device_id,
            status = response.status.as_u16(),
            "Digest-authenticated ISAPI request rejected"
        );
        Err(Error::Authentication {
            status: response.status.as_u16(),
            message: describe(&response),
        })
    }

    /// Copy of `request` carrying the digest `Authorization` header.
    /// The plaintext password does not outlive this call.
    fn authorize(
        &self,
        device: &DeviceTarget,
        mut request: DeviceRequest,
        uri: &str,
        challenge: &DigestChallenge,
    ) -> Result<DeviceRequest> {
        let password = self.decryptor.decrypt(&device.encrypted_secret).map_err(|_| {
            warn!(device_id = %device.device_id, "Credential decryption failed");
            Error::Decryption
        })?;

        let context = DigestContext::new(&device.username, &password, request.method.as_str(), uri);
        let authorization = challenge.respond(&context)?;

        let mut value = HeaderValue::from_str(&authorization)
            .map_err(|_| Error::Config("digest header is not valid header text".into()))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);

        Ok(request)
    }

    /// Call and decode a JSON response body
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        device: &DeviceTarget,
        options: RequestOptions,
    ) -> Result<T> {
        self.request(device, options).await?.json()
    }

    pub async fn get(&self, device: &DeviceTarget, path: &str) -> Result<DeviceResponse> {
        self.request(device, RequestOptions::get(path)).await
    }

    pub async fn delete(&self, device: &DeviceTarget, path: &str) -> Result<DeviceResponse> {
        self.request(device, RequestOptions::new(Method::DELETE, path)).await
    }

    pub async fn put_json<T: Serialize>(
        &self,
        device: &DeviceTarget,
        path: &str,
        body: &T,
    ) -> Result<DeviceResponse> {
        self.request(device, RequestOptions::new(Method::PUT, path).with_json(body)?)
            .await
    }

    pub async fn post_json<T: Serialize>(
        &self,
        device: &DeviceTarget,
        path: &str,
        body: &T,
    ) -> Result<DeviceResponse> {
        self.request(device, RequestOptions::new(Method::POST, path).with_json(body)?)
            .await
    }
}

/// Pick the Digest challenge out of a 401, ignoring any Basic offer beside it
fn select_challenge(response: &DeviceResponse) -> Result<DigestChallenge> {
    let offers = response.www_authenticate();
    if offers.is_empty() {
        return Err(Error::Challenge(
            "401 response without WWW-Authenticate header".into(),
        ));
    }

    match offers.iter().find(|v| is_digest_scheme(v)) {
        Some(header) => DigestChallenge::parse(header),
        None => Err(Error::Challenge(format!(
            "device offered no Digest challenge: {}",
            offers.join("; ")
        ))),
    }
}

fn describe(response: &DeviceResponse) -> String {
    let reason = response.status.canonical_reason().unwrap_or("unknown status");
    let body = response.snippet();
    if body.is_empty() {
        reason.to_string()
    } else {
        format!("{}: {}", reason, body)
    }
}
