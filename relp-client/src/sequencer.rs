//! Transaction id assignment and response matching.

use crate::error::ClientError;
use relp_protocol::{Command, Frame, Status, MAX_TXN, OPEN_TXN};

/// Hands out transaction ids for one session.
///
/// Txn 1 belongs to `open`, so the first message gets txn 2. Ids are never
/// reused; past `MAX_TXN` the sequencer refuses to continue instead of
/// wrapping around.
#[derive(Debug, Clone)]
pub struct TxnSequencer {
    next: u64,
}

impl TxnSequencer {
    /// First txn handed out after `open`.
    pub const FIRST: u64 = OPEN_TXN + 1;

    pub fn new() -> Self {
        Self { next: Self::FIRST }
    }

    /// Returns the txn the next message would get.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Takes the next txn.
    pub fn next_txn(&mut self) -> Result<u64, ClientError> {
        if self.next > MAX_TXN {
            return Err(ClientError::TxnExhausted(MAX_TXN));
        }
        let txn = self.next;
        self.next += 1;
        Ok(txn)
    }

    /// Starts over at `FIRST`, for a fresh session.
    pub fn reset(&mut self) {
        self.next = Self::FIRST;
    }
}

impl Default for TxnSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that `response` acknowledges the request sent with `txn`.
pub fn match_response(txn: u64, response: &Frame) -> Result<(), ClientError> {
    if response.command != Command::Rsp {
        return Err(ClientError::CommandMismatch {
            txn,
            command: response.command.to_string(),
            payload: response.payload_lossy().into_owned(),
        });
    }

    if response.txn != txn {
        return Err(ClientError::TxnMismatch {
            expected: txn,
            actual: response.txn,
        });
    }

    match Status::parse(&response.payload) {
        Ok(status) if status.is_ok() => Ok(()),
        Ok(status) => Err(ClientError::Rejected {
            txn,
            status: status.to_string(),
        }),
        Err(_) => Err(ClientError::Rejected {
            txn,
            status: response.payload_lossy().into_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_after_open() {
        let mut seq = TxnSequencer::new();
        assert_eq!(seq.peek(), 2);
        assert_eq!(seq.next_txn().unwrap(), 2);
        assert_eq!(seq.next_txn().unwrap(), 3);
        assert_eq!(seq.peek(), 4);
    }

    #[test]
    fn test_reset() {
        let mut seq = TxnSequencer::new();
        seq.next_txn().unwrap();
        seq.next_txn().unwrap();
        seq.reset();
        assert_eq!(seq.next_txn().unwrap(), 2);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut seq = TxnSequencer { next: MAX_TXN };
        assert_eq!(seq.next_txn().unwrap(), MAX_TXN);
        assert!(matches!(
            seq.next_txn(),
            Err(ClientError::TxnExhausted(MAX_TXN))
        ));
        // Still exhausted; nothing wraps.
        assert!(seq.next_txn().is_err());
    }

    #[test]
    fn test_match_ok() {
        assert!(match_response(7, &Frame::ok(7)).is_ok());
    }

    #[test]
    fn test_match_txn_mismatch() {
        let result = match_response(7, &Frame::ok(8));
        assert!(matches!(
            result,
            Err(ClientError::TxnMismatch {
                expected: 7,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_match_command_mismatch() {
        let result = match_response(7, &Frame::syslog(7, "oops"));
        match result {
            Err(ClientError::CommandMismatch { txn, command, .. }) => {
                assert_eq!(txn, 7);
                assert_eq!(command, "syslog");
            }
            other => panic!("expected CommandMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_match_rejected() {
        let result = match_response(7, &Frame::err(7));
        assert!(matches!(result, Err(ClientError::Rejected { txn: 7, .. })));

        let result = match_response(7, &Frame::rsp(7, "garbage"));
        assert!(matches!(result, Err(ClientError::Rejected { .. })));
    }
}
