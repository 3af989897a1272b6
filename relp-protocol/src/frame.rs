//! Text frame format for RELP.
//!
//! Frame layout:
//!
//! ```text
//! <txn> SP <command> SP <length> [SP <payload>] LF
//! ```
//!
//! `txn` and `length` are ASCII decimal (at most 9 digits). The payload and
//! its separating space are present only when `length > 0`, so an empty
//! `close` is encoded as `"5 close 0\n"`. For compatibility with senders that
//! always emit the separator, the decoder also accepts `"5 close 0 \n"`.

use crate::error::ProtocolError;
use crate::offer::{RSP_ERR, RSP_OK};
use crate::{MAX_COMMAND_LEN, MAX_NUMBER_DIGITS, MAX_PAYLOAD_SIZE, MAX_TXN, OPEN_TXN};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

const SP: u8 = b' ';
const LF: u8 = b'\n';

/// A RELP command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Session open with offer negotiation.
    Open,
    /// A syslog record.
    Syslog,
    /// Session close.
    Close,
    /// Response to a previous command.
    Rsp,
    /// Any other command token (rejected by servers with `500 ERR`).
    Other(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Open => "open",
            Command::Syslog => "syslog",
            Command::Close => "close",
            Command::Rsp => "rsp",
            Command::Other(token) => token,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let token = self.as_str();
        if token.is_empty()
            || token.len() > MAX_COMMAND_LEN
            || !token.bytes().all(|b| b.is_ascii_graphic())
        {
            return Err(ProtocolError::InvalidCommand(token.to_string()));
        }
        Ok(())
    }
}

impl From<&str> for Command {
    fn from(token: &str) -> Self {
        match token {
            "open" => Command::Open,
            "syslog" => Command::Syslog,
            "close" => Command::Close,
            "rsp" => Command::Rsp,
            other => Command::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed RELP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Transaction id.
    pub txn: u64,
    /// Command.
    pub command: Command,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(txn: u64, command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            txn,
            command,
            payload: payload.into(),
        }
    }

    /// Creates the `open` frame carrying an offer.
    pub fn open(offer: impl Into<Bytes>) -> Self {
        Self::new(OPEN_TXN, Command::Open, offer)
    }

    pub fn syslog(txn: u64, message: impl Into<Bytes>) -> Self {
        Self::new(txn, Command::Syslog, message)
    }

    /// Creates an empty `close` frame.
    pub fn close(txn: u64) -> Self {
        Self::new(txn, Command::Close, Bytes::new())
    }

    pub fn rsp(txn: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(txn, Command::Rsp, payload)
    }

    /// Creates a `rsp` frame with payload `200 OK`.
    pub fn ok(txn: u64) -> Self {
        Self::rsp(txn, Bytes::from_static(RSP_OK.as_bytes()))
    }

    /// Creates a `rsp` frame with payload `500 ERR`.
    pub fn err(txn: u64) -> Self {
        Self::rsp(txn, Bytes::from_static(RSP_ERR.as_bytes()))
    }

    /// Returns the payload as UTF-8, lossily.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.txn > MAX_TXN {
            return Err(ProtocolError::TxnOutOfRange(self.txn));
        }
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        self.command.validate()?;

        let txn = self.txn.to_string();
        let len = self.payload.len().to_string();
        let command = self.command.as_str();
        let mut buf =
            BytesMut::with_capacity(txn.len() + command.len() + len.len() + self.payload.len() + 4);

        buf.put_slice(txn.as_bytes());
        buf.put_u8(SP);
        buf.put_slice(command.as_bytes());
        buf.put_u8(SP);
        buf.put_slice(len.as_bytes());
        if !self.payload.is_empty() {
            buf.put_u8(SP);
            buf.put_slice(&self.payload);
        }
        buf.put_u8(LF);

        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded and removed
    /// from `buf`, `Ok(None)` if more data is needed, or `Err` on malformed
    /// input. Nothing is consumed unless a whole frame is present.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some(txn_tok) = scan_token(buf, 0, MAX_NUMBER_DIGITS, "txn")? else {
            return Ok(None);
        };
        if txn_tok.delim != SP {
            return Err(ProtocolError::InvalidNumber {
                field: "txn",
                token: lossy(&buf[txn_tok.start..txn_tok.end]),
            });
        }
        let txn = parse_number(&buf[txn_tok.start..txn_tok.end], "txn")?;

        let Some(cmd_tok) = scan_token(buf, txn_tok.end + 1, MAX_COMMAND_LEN, "command")? else {
            return Ok(None);
        };
        let raw_command = &buf[cmd_tok.start..cmd_tok.end];
        if cmd_tok.delim != SP
            || raw_command.is_empty()
            || !raw_command.iter().all(|b| b.is_ascii_graphic())
        {
            return Err(ProtocolError::InvalidCommand(lossy(raw_command)));
        }

        let Some(len_tok) = scan_token(buf, cmd_tok.end + 1, MAX_NUMBER_DIGITS, "length")? else {
            return Ok(None);
        };
        let len = parse_number(&buf[len_tok.start..len_tok.end], "length")? as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let (payload_start, frame_end) = if len == 0 {
            if len_tok.delim == LF {
                (len_tok.end, len_tok.end + 1)
            } else {
                // "0 \n": tolerated separator before an empty payload.
                let trailer = len_tok.end + 1;
                match buf.get(trailer) {
                    None => return Ok(None),
                    Some(&LF) => (trailer, trailer + 1),
                    Some(&found) => return Err(ProtocolError::MissingTrailer { found }),
                }
            }
        } else {
            if len_tok.delim != SP {
                return Err(ProtocolError::MissingSeparator);
            }
            let start = len_tok.end + 1;
            let trailer = start + len;
            match buf.get(trailer) {
                None => return Ok(None),
                Some(&LF) => (start, trailer + 1),
                Some(&found) => return Err(ProtocolError::MissingTrailer { found }),
            }
        };

        let command =
            Command::from(std::str::from_utf8(raw_command).map_err(|_| ProtocolError::InvalidUtf8)?);
        let raw = buf.split_to(frame_end).freeze();
        let payload = raw.slice(payload_start..payload_start + len);

        Ok(Some(Self {
            txn,
            command,
            payload,
        }))
    }
}

/// Position of a header token inside the buffer.
struct Token {
    start: usize,
    end: usize,
    delim: u8,
}

/// Finds the token starting at `start`, terminated by SP or LF.
fn scan_token(
    buf: &[u8],
    start: usize,
    max: usize,
    field: &'static str,
) -> Result<Option<Token>, ProtocolError> {
    let rest = buf.get(start..).unwrap_or_default();
    match rest.iter().position(|&b| b == SP || b == LF) {
        Some(offset) if offset > max => Err(ProtocolError::TokenTooLong { field, max }),
        Some(offset) => Ok(Some(Token {
            start,
            end: start + offset,
            delim: rest[offset],
        })),
        None if rest.len() > max => Err(ProtocolError::TokenTooLong { field, max }),
        None => Ok(None),
    }
}

fn parse_number(token: &[u8], field: &'static str) -> Result<u64, ProtocolError> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::InvalidNumber {
            field,
            token: lossy(token),
        });
    }
    token
        .iter()
        .try_fold(0u64, |acc, &d| acc.checked_mul(10)?.checked_add(u64::from(d - b'0')))
        .ok_or_else(|| ProtocolError::InvalidNumber {
            field,
            token: lossy(token),
        })
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
