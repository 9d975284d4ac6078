use crate::enums::{Algorithm, Qop};
use crate::utils::{generate_cnonce, header_value_problem, md5_hex};
use crate::{Error, Result};
use std::collections::HashMap;
use std::str::FromStr;

/// Nonce count sent with every digest response.
///
/// The engine answers each challenge exactly once, so the counter never
/// advances. Reusing a nonce across requests would require a per-nonce count.
pub const NONCE_COUNT: &str = "00000001";

const SCHEME: &str = "Digest";

/// True if a `WWW-Authenticate` value announces the Digest scheme
pub fn is_digest_scheme(header: &str) -> bool {
    let header = header.trim_start();
    match (header.get(..SCHEME.len()), header.get(SCHEME.len()..)) {
        (Some(scheme), Some(rest)) => {
            scheme.eq_ignore_ascii_case(SCHEME)
                && rest.chars().next().map_or(true, |c| c.is_ascii_whitespace())
        }
        _ => false,
    }
}

/// Credentials and request line for one digest response.
///
/// All fields are borrowed; build one per retried request and drop it.
#[derive(Debug)]
pub struct DigestContext<'a> {
    pub username: &'a str,
    /// Plaintext password, only alive for the duration of the call
    pub password: &'a str,
    /// Upper-case HTTP method
    pub method: &'a str,
    /// Path and query of the request (not the full URL)
    pub uri: &'a str,
    /// Fixed client nonce for tests; a random one is generated otherwise
    pub cnonce: Option<&'a str>,
}

impl<'a> DigestContext<'a> {
    pub fn new(username: &'a str, password: &'a str, method: &'a str, uri: &'a str) -> Self {
        Self {
            username,
            password,
            method,
            uri,
            cnonce: None,
        }
    }

    pub fn set_custom_cnonce(&mut self, cnonce: &'a str) {
        self.cnonce = Some(cnonce);
    }
}

/// Parameters of a `WWW-Authenticate: Digest` challenge.
///
/// Parsed per 401 response and consumed by a single [`respond`](Self::respond);
/// never cached.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// None when the device uses the RFC 2069 form
    pub qop: Option<Vec<Qop>>,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    /// Device reported our previous nonce as expired
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header
    ///
    /// # Errors
    /// `Error::Challenge` if the scheme is not Digest, `realm`/`nonce` are
    /// missing, a value cannot be echoed back in a quoted field, or the
    /// algorithm is not MD5.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if !is_digest_scheme(input) {
            return Err(Error::Challenge(format!(
                "not a Digest challenge: {}",
                input.split_whitespace().next().unwrap_or("")
            )));
        }

        let mut kv = parse_header_map(&input[SCHEME.len()..])?;

        if let Some(problem) = kv.iter().find_map(|(k, v)| header_value_problem(k, v)) {
            return Err(Error::Challenge(problem));
        }

        let realm = kv
            .remove("realm")
            .ok_or_else(|| Error::Challenge("realm not given".into()))?;
        let nonce = kv
            .remove("nonce")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Challenge("nonce not given".into()))?;

        let algorithm = match kv.get("algorithm") {
            Some(a) => Algorithm::from_str(a)?,
            None => Algorithm::default(),
        };

        // unknown qop tokens are skipped; respond() decides if what is left is usable
        let qop = kv.get("qop").map(|list| {
            list.split(',')
                .filter_map(|q| Qop::from_str(q.trim()).ok())
                .collect::<Vec<_>>()
        });

        Ok(Self {
            realm,
            nonce,
            qop,
            opaque: kv.remove("opaque"),
            algorithm,
            stale: kv
                .get("stale")
                .map_or(false, |v| v.eq_ignore_ascii_case("true")),
        })
    }

    /// Compute the `Authorization` header value answering this challenge
    ///
    /// # Errors
    /// `Error::Challenge` if the challenge only offers `auth-int`;
    /// `Error::Config` if the context carries a username or URI that cannot be
    /// placed in a header.
    pub fn respond(&self, context: &DigestContext) -> Result<String> {
        if let Some(problem) = header_value_problem("username", context.username)
            .or_else(|| header_value_problem("uri", context.uri))
        {
            return Err(Error::Config(problem));
        }

        let qop = match &self.qop {
            None => None,
            Some(list) if list.contains(&Qop::Auth) => Some(Qop::Auth),
            Some(list) => {
                return Err(Error::Challenge(format!(
                    "no supported qop offered: {:?}",
                    list
                )))
            }
        };

        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            context.username, self.realm, context.password
        ));
        let ha2 = md5_hex(&format!("{}:{}", context.method, context.uri));

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}""#,
            context.username, self.realm, self.nonce, context.uri
        );

        match qop {
            Some(qop) => {
                let cnonce = match context.cnonce {
                    Some(c) => c.to_owned(),
                    None => generate_cnonce(),
                };
                let response = md5_hex(&format!(
                    "{}:{}:{}:{}:{}:{}",
                    ha1, self.nonce, NONCE_COUNT, cnonce, qop, ha2
                ));
                header.push_str(&format!(
                    r#", qop={}, nc={}, cnonce="{}", response="{}""#,
                    qop, NONCE_COUNT, cnonce, response
                ));
            }
            None => {
                let response = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2));
                header.push_str(&format!(r#", response="{}""#, response));
            }
        }

        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{}""#, opaque));
        }

        Ok(header)
    }
}

impl FromStr for DigestChallenge {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

/// Parse the comma separated `key=value` list following the scheme token.
///
/// Values may be quoted (with backslash escapes) or bare tokens. Whitespace
/// around `=` is ignored, and bare flags without a value are skipped.
pub fn parse_header_map(input: &str) -> Result<HashMap<String, String>> {
    #[derive(Debug)]
    enum ParserState {
        White,
        Name(usize),
        ValueBegin,
        ValueQuoted,
        ValueQuotedNextLiteral,
        ValuePlain,
    }

    let mut state = ParserState::White;

    let mut parsed = HashMap::<String, String>::new();
    let mut current_token: Option<String> = None;
    let mut current_value = String::new();

    let mut commit = |token: &mut Option<String>, value: &mut String| -> Result<()> {
        let name = token
            .take()
            .ok_or_else(|| Error::Challenge("value without a parameter name".into()))?;
        parsed.insert(name.trim().to_ascii_lowercase(), std::mem::take(value));
        Ok(())
    };

    for (pos, c) in input.char_indices() {
        match state {
            ParserState::White => {
                if c.is_alphabetic() {
                    state = ParserState::Name(pos);
                }
            }
            ParserState::Name(name_start) => match c {
                '=' => {
                    current_token = Some(input[name_start..pos].to_string());
                    state = ParserState::ValueBegin;
                }
                ',' => state = ParserState::White,
                _ => {}
            },
            ParserState::ValueBegin => {
                current_value.clear();
                state = match c {
                    c if c.is_ascii_whitespace() => ParserState::ValueBegin,
                    '"' => ParserState::ValueQuoted,
                    _ => {
                        current_value.push(c);
                        ParserState::ValuePlain
                    }
                };
            }
            ParserState::ValueQuoted => match c {
                '"' => {
                    commit(&mut current_token, &mut current_value)?;
                    state = ParserState::White;
                }
                '\\' => state = ParserState::ValueQuotedNextLiteral,
                _ => current_value.push(c),
            },
            ParserState::ValuePlain => {
                if c == ',' || c.is_ascii_whitespace() {
                    commit(&mut current_token, &mut current_value)?;
                    state = ParserState::White;
                } else {
                    current_value.push(c);
                }
            }
            ParserState::ValueQuotedNextLiteral => {
                current_value.push(c);
                state = ParserState::ValueQuoted
            }
        }
    }

    match state {
        ParserState::ValuePlain => commit(&mut current_token, &mut current_value)?,
        ParserState::White | ParserState::Name(_) => {}
        _ => {
            return Err(Error::Challenge(format!(
                "unexpected end of header in state {:?}",
                state
            )))
        }
    }

    Ok(parsed)
}
