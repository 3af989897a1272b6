//! Offers exchanged by the `open` command, and response status lines.
//!
//! An offer is a newline separated list of `name=value` lines:
//!
//! ```text
//! relp_version=0
//! relp_software=relp-rs,0.1.0,https://github.com/relp-rs/relp
//! commands=syslog
//! ```
//!
//! A successful `open` is answered with `200 OK\n` followed by the server's
//! own offer.

use crate::error::ProtocolError;
use crate::{RELP_VERSION, SOFTWARE_NAME, SOFTWARE_URL};
use bytes::Bytes;
use std::fmt;

/// Positive response status line.
pub const RSP_OK: &str = "200 OK";

/// Negative response status line.
pub const RSP_ERR: &str = "500 ERR";

/// Identification of the peer software (`relp_software=name,version,url`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Software {
    pub name: String,
    pub version: String,
    pub url: String,
}

impl Software {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            url: url.into(),
        }
    }
}

impl Default for Software {
    fn default() -> Self {
        Self::new(SOFTWARE_NAME, env!("CARGO_PKG_VERSION"), SOFTWARE_URL)
    }
}

impl fmt::Display for Software {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.name, self.version, self.url)
    }
}

/// A RELP offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    /// Protocol version.
    pub relp_version: u32,
    /// Software identification, if announced.
    pub software: Option<Software>,
    /// Supported commands.
    pub commands: Vec<String>,
    /// Additional `name=value` lines, in order.
    pub params: Vec<(String, String)>,
}

impl Default for Offer {
    fn default() -> Self {
        Self {
            relp_version: RELP_VERSION,
            software: Some(Software::default()),
            commands: vec!["syslog".to_string()],
            params: Vec::new(),
        }
    }
}

impl Offer {
    /// Creates the default offer of this implementation.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_software(mut self, software: Software) -> Self {
        self.software = Some(software);
        self
    }

    /// Appends an extra `name=value` line.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Returns whether the offer lists `command`.
    pub fn supports(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }

    /// Returns the value of an extra parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encodes the offer as a frame payload.
    pub fn encode(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    /// Parses an offer payload.
    ///
    /// Unknown names are kept in `params`. A line without `=` is a name with
    /// an empty value.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
        let mut offer = Offer {
            relp_version: RELP_VERSION,
            software: None,
            commands: Vec::new(),
            params: Vec::new(),
        };

        for line in text.split('\n').map(str::trim_end).filter(|l| !l.is_empty()) {
            let (name, value) = line.split_once('=').unwrap_or((line, ""));
            match name {
                "relp_version" => {
                    offer.relp_version = value.parse().map_err(|_| {
                        ProtocolError::InvalidOffer(format!("bad relp_version {:?}", value))
                    })?;
                }
                "relp_software" => {
                    let mut parts = value.splitn(3, ',');
                    offer.software = Some(Software::new(
                        parts.next().unwrap_or_default(),
                        parts.next().unwrap_or_default(),
                        parts.next().unwrap_or_default(),
                    ));
                }
                "commands" => {
                    offer.commands = value
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                other => offer.params.push((other.to_string(), value.to_string())),
            }
        }

        Ok(offer)
    }
}

impl fmt::Display for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relp_version={}", self.relp_version)?;
        if let Some(software) = &self.software {
            write!(f, "\nrelp_software={}", software)?;
        }
        write!(f, "\ncommands={}", self.commands.join(","))?;
        for (name, value) in &self.params {
            write!(f, "\n{}={}", name, value)?;
        }
        Ok(())
    }
}

/// Builds the payload answering a successful `open`: `200 OK\n<offer>`.
pub fn open_response(offer: &Offer) -> Bytes {
    Bytes::from(format!("{}\n{}", RSP_OK, offer))
}

/// Returns whether a `rsp` payload reports success for an `open`.
pub fn is_open_accepted(payload: &[u8]) -> bool {
    payload.starts_with(RSP_OK.as_bytes())
}

/// Splits a `rsp` payload into its status line and the data following it.
pub fn split_response(payload: &[u8]) -> (&[u8], &[u8]) {
    match payload.iter().position(|&b| b == b'\n') {
        Some(pos) => (&payload[..pos], &payload[pos + 1..]),
        None => (payload, &payload[payload.len()..]),
    }
}

/// Status line of a `rsp` payload (`<code> <message>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

impl Status {
    /// Parses the status line at the start of a `rsp` payload.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (line, _) = split_response(payload);
        let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        let (code, message) = line.split_once(' ').unwrap_or((line, ""));
        let code = code.parse().map_err(|_| ProtocolError::InvalidNumber {
            field: "status code",
            token: code.to_string(),
        })?;
        Ok(Self {
            code,
            message: message.to_string(),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.code == 200
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}
