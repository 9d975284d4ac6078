//! Hand-built fakes for the collaborator traits

use crate::cache::SessionCache;
use crate::credentials::SecretDecryptor;
use crate::device::DeviceTarget;
use crate::error::{CacheError, TransportFailureKind};
use crate::transport::{DeviceRequest, DeviceResponse, HttpTransport, TransportFailure};
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use zeroize::Zeroizing;

pub type Reply = std::result::Result<DeviceResponse, TransportFailure>;

type Responder = Box<dyn Fn(&DeviceRequest) -> Reply + Send + Sync>;

/// Transport answering from a closure and recording every request
pub struct FakeTransport {
    responder: Responder,
    delay: Option<Duration>,
    requests: Mutex<Vec<DeviceRequest>>,
}

impl FakeTransport {
    pub fn new(responder: impl Fn(&DeviceRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies in order; once exhausted every call fails
    pub fn scripted(replies: Vec<Reply>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            replies.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(TransportFailure::new(
                    TransportFailureKind::Other,
                    "no scripted reply left",
                ))
            })
        })
    }

    /// Sleep before answering, keeping the call in flight
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<DeviceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: DeviceRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        // decided at send time so replies follow call order
        let reply = (self.responder)(&request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

/// Accepts secrets of the form `enc:<password>`
#[derive(Default)]
pub struct CountingDecryptor {
    calls: AtomicUsize,
}

impl CountingDecryptor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SecretDecryptor for CountingDecryptor {
    fn decrypt(&self, encrypted_secret: &str) -> Result<Zeroizing<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        encrypted_secret
            .strip_prefix("enc:")
            .map(|p| Zeroizing::new(p.to_string()))
            .ok_or(Error::Decryption)
    }
}

/// Cache whose every operation fails
pub struct BrokenCache;

#[async_trait]
impl SessionCache for BrokenCache {
    async fn get(&self, _key: &str) -> std::result::Result<Option<String>, CacheError> {
        Err(CacheError("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl_secs: u64) -> std::result::Result<(), CacheError> {
        Err(CacheError("connection refused".into()))
    }

    async fn del(&self, _key: &str) -> std::result::Result<(), CacheError> {
        Err(CacheError("connection refused".into()))
    }
}

pub fn device(id: &str) -> DeviceTarget {
    DeviceTarget::new(id, "10.0.0.1", "admin", "enc:12345")
}

pub fn ok_body(body: &str) -> Reply {
    Ok(DeviceResponse::new(StatusCode::OK, body.to_string()))
}

pub fn status_only(code: u16) -> Reply {
    Ok(DeviceResponse::new(
        StatusCode::from_u16(code).unwrap(),
        Vec::new(),
    ))
}

pub fn with_www_authenticate(code: u16, offers: &[&'static str]) -> Reply {
    let mut response = DeviceResponse::new(StatusCode::from_u16(code).unwrap(), Vec::new());
    for offer in offers {
        response
            .headers
            .append(WWW_AUTHENTICATE, HeaderValue::from_static(offer));
    }
    Ok(response)
}

pub fn digest_challenge() -> Reply {
    with_www_authenticate(
        401,
        &[r#"Digest qop="auth", realm="DS-K1T671", nonce="4d6a4e474f5459344e47553d", stale="FALSE", opaque="0a1b2c""#],
    )
}
