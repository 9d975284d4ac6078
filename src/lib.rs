//! Digest-authenticated ISAPI access to Hikvision access-control and camera devices.
//!
//! Two cooperating pieces make up the crate:
//!
//! - [`IsapiClient`], the request engine. It sends a call, and when the device
//!   answers `401` with a `WWW-Authenticate: Digest` challenge it decrypts the
//!   stored credential, computes an RFC 2617 `Authorization` header and retries
//!   exactly once.
//! - [`SessionService`], which caches the `{ security, identityKey }` session
//!   some services need, per device and for a fixed TTL, and collapses
//!   concurrent acquisitions for one device into a single call.
//!
//! The collaborators ([`HttpTransport`], [`SecretDecryptor`], [`SessionCache`])
//! are traits, so both pieces run against hand-built fakes in tests.
//!
//! # Examples
//!
//! Answering a challenge directly:
//!
//! ```
//! use hikvision_isapi::{DigestChallenge, DigestContext};
//!
//! let www_authenticate = r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;
//!
//! let mut context = DigestContext::new("Mufasa", "Circle Of Life", "GET", "/dir/index.html");
//! // fixed client nonce for the example; a random one is generated otherwise
//! context.set_custom_cnonce("0a4f113b");
//!
//! let challenge = hikvision_isapi::parse(www_authenticate).unwrap();
//! let answer = challenge.respond(&context).unwrap();
//! assert_eq!(answer, r#"Digest username="Mufasa", realm="testrealm@host.com", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", uri="/dir/index.html", qop=auth, nc=00000001, cnonce="0a4f113b", response="6629fae49393a05397450978507c4ef1", opaque="5ccc069c403ebaf9f0171e9517f40e41""#);
//! ```
//!
//! Wiring the engine and the coordinator:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hikvision_isapi::{
//!     DeviceTarget, Error, IsapiClient, IsapiConfig, MemoryCache, SessionConfig,
//!     SessionOptions, SessionService,
//! };
//! use zeroize::Zeroizing;
//!
//! # async fn run() -> hikvision_isapi::Result<()> {
//! let decryptor = |secret: &str| -> hikvision_isapi::Result<Zeroizing<String>> {
//!     // plug the real credential store in here
//!     secret.strip_prefix("plain:").map(|s| Zeroizing::new(s.to_string())).ok_or(Error::Decryption)
//! };
//!
//! let client = Arc::new(IsapiClient::with_reqwest(IsapiConfig::default(), Arc::new(decryptor))?);
//! let sessions = SessionService::new(client.clone(), Arc::new(MemoryCache::new()), SessionConfig::default());
//!
//! let door = DeviceTarget::new("door-1", "192.168.1.64", "admin", "plain:12345");
//! let info = client.get(&door, "/ISAPI/System/deviceInfo").await?;
//! println!("{}", info.text());
//!
//! let session = sessions.get_session(&door, SessionOptions::default()).await?;
//! println!("identity key: {}", session.identity_key);
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod config;
mod credentials;
mod device;
mod digest;
mod enums;
mod error;
mod session;
mod transport;
mod utils;

#[cfg(test)]
mod test_support;

pub use error::{CacheError, Error, Result, TransportFailureKind};

pub use crate::cache::{MemoryCache, SessionCache};
pub use crate::client::{IsapiClient, RequestOptions};
pub use crate::config::{IsapiConfig, SessionConfig};
pub use crate::credentials::SecretDecryptor;
pub use crate::device::{request_uri, DeviceTarget};
pub use crate::digest::{is_digest_scheme, DigestChallenge, DigestContext, NONCE_COUNT};
pub use crate::session::{
    CachedSession, PreloadSummary, SecureSession, SessionMetrics, SessionOptions, SessionService,
};
pub use crate::transport::{
    DeviceRequest, DeviceResponse, HttpTransport, ReqwestTransport, TransportFailure,
};

pub use crate::enums::*;

/// Parse a `WWW-Authenticate` header value.
/// Shorthand for [`DigestChallenge::parse()`](struct.DigestChallenge.html#method.parse).
pub fn parse(www_authenticate: &str) -> Result<DigestChallenge> {
    DigestChallenge::parse(www_authenticate)
}

#[test]
fn test_parse_respond() {
    let src = r#"
    Digest
       realm="DS-K1T671MF",
       qop="auth",
       nonce="4e6a59304e7a63334f5441364e6d4e6d4e7a59334e413d3d",
       opaque="c7a0f16b"
    "#;

    let mut context = DigestContext::new("admin", "hik12345", "GET", "/ISAPI/System/deviceInfo");
    context.set_custom_cnonce("1a2b3c4d5e6f7a8b");

    let challenge = crate::parse(src).unwrap();
    let answer = challenge.respond(&context).unwrap();

    let ha1 = utils::md5_hex("admin:DS-K1T671MF:hik12345");
    let ha2 = utils::md5_hex("GET:/ISAPI/System/deviceInfo");
    let expected = utils::md5_hex(&format!(
        "{}:4e6a59304e7a63334f5441364e6d4e6d4e7a59334e413d3d:00000001:1a2b3c4d5e6f7a8b:auth:{}",
        ha1, ha2
    ));

    assert_eq!(
        answer.replace(", ", ",\n  "),
        format!(
            r#"Digest username="admin",
  realm="DS-K1T671MF",
  nonce="4e6a59304e7a63334f5441364e6d4e6d4e7a59334e413d3d",
  uri="/ISAPI/System/deviceInfo",
  qop=auth,
  nc=00000001,
  cnonce="1a2b3c4d5e6f7a8b",
  response="{}",
  opaque="c7a0f16b""#,
            expected
        )
    );
}
