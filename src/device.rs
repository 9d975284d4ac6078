use crate::enums::Protocol;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

/// Connection details of one physical device.
///
/// Supplied by the caller on every operation and only borrowed by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTarget {
    /// Stable identifier used for cache keys and log fields
    pub device_id: String,
    /// Hostname or IP address
    #[serde(alias = "ipAddress")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub use_https: bool,
    pub username: String,
    /// Credential as stored; decrypted only when a challenge must be answered
    pub encrypted_secret: String,
}

impl DeviceTarget {
    pub fn new(
        device_id: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        encrypted_secret: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            port: None,
            use_https: false,
            username: username.into(),
            encrypted_secret: encrypted_secret.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    pub fn protocol(&self) -> Protocol {
        if self.use_https {
            Protocol::Https
        } else {
            Protocol::Http
        }
    }

    /// `scheme://host[:port]`; the port is left out when it is the scheme default
    pub fn base_url(&self) -> Result<String> {
        let host = self.host.trim();
        if host.is_empty() || host.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(Error::Config(format!(
                "device {} has an invalid host: {:?}",
                self.device_id, self.host
            )));
        }

        // bare IPv6 literals need brackets inside a URL; any other colon is a
        // port smuggled into the host
        let host = if host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]", host)
        } else if host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map_or(false, |h| h.parse::<Ipv6Addr>().is_ok())
        {
            host.to_string()
        } else if host.contains(':') {
            return Err(Error::Config(format!(
                "device {} host {:?} must not carry a port; set the port field instead",
                self.device_id, self.host
            )));
        } else {
            host.to_string()
        };

        let protocol = self.protocol();
        Ok(match self.port {
            Some(port) if port != protocol.default_port() => {
                format!("{}://{}:{}", protocol, host, port)
            }
            _ => format!("{}://{}", protocol, host),
        })
    }

    /// Full URL of an endpoint on this device
    pub fn url_for(&self, path: &str) -> Result<String> {
        Ok(format!("{}{}", self.base_url()?, request_uri(path)))
    }
}

/// Path plus query as it appears on the request line and in the digest `uri` field
pub fn request_uri(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeviceTarget {
        DeviceTarget::new("door-1", "192.168.1.64", "admin", "enc:abc")
    }

    #[test]
    fn test_url_building() {
        assert_eq!(target().base_url().unwrap(), "http://192.168.1.64");
        assert_eq!(
            target().with_port(8000).url_for("ISAPI/System/deviceInfo").unwrap(),
            "http://192.168.1.64:8000/ISAPI/System/deviceInfo"
        );
        assert_eq!(
            target().with_https(true).with_port(443).url_for("/ISAPI/System/time").unwrap(),
            "https://192.168.1.64/ISAPI/System/time"
        );
        assert_eq!(
            DeviceTarget::new("cam", "fe80::1", "admin", "x")
                .with_port(8080)
                .base_url()
                .unwrap(),
            "http://[fe80::1]:8080"
        );
    }

    #[test]
    fn test_invalid_host() {
        let mut t = target();
        t.host = "  ".into();
        assert!(matches!(t.base_url(), Err(Error::Config(_))));
        t.host = "10.0.0.1/evil".into();
        assert!(t.url_for("/").is_err());
        t.host = "10.0.0.1:8000".into();
        assert!(matches!(t.base_url(), Err(Error::Config(_))));
        t.host = "[10.0.0.1:8000]".into();
        assert!(matches!(t.base_url(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bracketed_ipv6_kept() {
        let t = DeviceTarget::new("cam", "[2001:db8::7]", "admin", "x");
        assert_eq!(t.url_for("/ISAPI").unwrap(), "http://[2001:db8::7]/ISAPI");
    }

    #[test]
    fn test_deserialize_vendor_shape() {
        let json = r#"{
            "deviceId": "door-7",
            "ipAddress": "10.0.0.7",
            "port": 80,
            "username": "admin",
            "encryptedSecret": "iv:cipher"
        }"#;
        let t: DeviceTarget = serde_json::from_str(json).unwrap();
        assert_eq!(t.host, "10.0.0.7");
        assert_eq!(t.port, Some(80));
        assert!(!t.use_https);
        assert_eq!(t.url_for("/ISAPI/System/deviceInfo").unwrap(), "http://10.0.0.7/ISAPI/System/deviceInfo");
    }

    #[test]
    fn test_request_uri() {
        assert_eq!(request_uri("ISAPI/Event/notification/alertStream"), "/ISAPI/Event/notification/alertStream");
        assert_eq!(request_uri("/ISAPI/AccessControl/UserInfo/Search?format=json"), "/ISAPI/AccessControl/UserInfo/Search?format=json");
    }
}
