use std::fmt::{self, Display, Formatter};
use std::result;

/// Why a request never produced an HTTP response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    /// The per-call timeout elapsed
    Timeout,
    /// TCP/TLS connection could not be established
    Connect,
    /// Anything else below the HTTP layer (body read, protocol errors...)
    Other,
}

impl Display for TransportFailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportFailureKind::Timeout => "timeout",
            TransportFailureKind::Connect => "connect",
            TransportFailureKind::Other => "network",
        })
    }
}

/// Error type of the request engine and the session coordinator.
///
/// Variants carry messages only, so the type is `Clone` and a single
/// acquisition result can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// 401 without a usable Digest challenge. Never retried.
    #[error("Digest challenge error: {0}")]
    Challenge(String),

    /// Network failure, timeout, or a non-2xx status outside the digest flow.
    /// `status` is `None` when no HTTP response was received.
    #[error("Transport error ({}): {message}", describe_status(.status, .kind))]
    Transport {
        status: Option<u16>,
        kind: Option<TransportFailureKind>,
        message: String,
        /// Set when the failure happened on the digest-authenticated attempt
        retried: bool,
    },

    /// The digest-authenticated attempt was still rejected by the device
    #[error("Authentication rejected with status {status}: {message}")]
    Authentication { status: u16, message: String },

    /// Acquired session is missing `security` or `identityKey`
    #[error("Session validation error: {0}")]
    SessionValidation(String),

    /// Credential store failure; intentionally without detail
    #[error("Failed to decrypt device credential")]
    Decryption,

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid device target, URL or header value
    #[error("Config error: {0}")]
    Config(String),

    /// Background session acquisition task panicked or was cancelled
    #[error("Session acquisition aborted: {0}")]
    Acquisition(String),
}

pub type Result<T> = result::Result<T, Error>;

fn describe_status(status: &Option<u16>, kind: &Option<TransportFailureKind>) -> String {
    match (status, kind) {
        (Some(code), _) => format!("status {}", code),
        (None, Some(kind)) => kind.to_string(),
        (None, None) => "network".to_string(),
    }
}

impl Error {
    /// Status failure without a transport-level cause
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Error::Transport {
            status: Some(status),
            kind: None,
            message: message.into(),
            retried: false,
        }
    }

    /// HTTP status carried by the error, if the device answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            Error::Authentication { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                kind: Some(TransportFailureKind::Timeout),
                ..
            }
        )
    }

    /// True when the device rejected our digest credentials
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Soft failure of the session cache collaborator.
///
/// The coordinator logs these and carries on as if the entry was absent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Cache error: {0}")]
pub struct CacheError(pub String);
