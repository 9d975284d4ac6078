use crate::{Error, Result};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Hash algorithm announced in a challenge.
///
/// ISAPI devices only ever offer MD5; anything else is refused at parse time
/// rather than answered with a hash the device would not accept.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Algorithm {
    #[default]
    Md5,
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("MD5") {
            Ok(Algorithm::Md5)
        } else {
            Err(Error::Challenge(format!("unsupported algorithm: {}", s)))
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Md5 => "MD5",
        })
    }
}

/// QOP field values
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Qop {
    Auth,
    AuthInt,
}

impl FromStr for Qop {
    type Err = Error;

    /// Parse from "auth" or "auth-int" as used in HTTP headers
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auth" => Ok(Qop::Auth),
            "auth-int" => Ok(Qop::AuthInt),
            _ => Err(Error::Challenge(format!("bad qop option: {}", s))),
        }
    }
}

impl Display for Qop {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        })
    }
}

/// Scheme used to reach a device
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// Port implied by the scheme when the target gives none
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_only_accepts_md5() {
        assert_eq!(Algorithm::from_str("MD5").unwrap(), Algorithm::Md5);
        assert_eq!(Algorithm::from_str("md5").unwrap(), Algorithm::Md5);
        assert!(matches!(
            Algorithm::from_str("SHA-256"),
            Err(Error::Challenge(_))
        ));
    }

    #[test]
    fn qop_parse() {
        assert_eq!(Qop::from_str("auth").unwrap(), Qop::Auth);
        assert_eq!(Qop::from_str("auth-int").unwrap(), Qop::AuthInt);
        assert!(Qop::from_str("token").is_err());
    }
}
