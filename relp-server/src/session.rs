//! Per-connection session bookkeeping.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no `open` seen yet.
    Connected,
    /// `open` answered.
    Open,
    /// `close` received or the stream ended.
    Closing,
}

/// State of one inbound connection.
pub struct Session {
    /// Unique connection ID.
    pub id: Uuid,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: SessionState,

    /// Offer the peer sent with `open`, verbatim.
    peer_offer: Option<String>,

    /// Frames decoded so far.
    frames: u64,

    /// Syslog messages delivered so far.
    messages: u64,

    created_at: Instant,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            state: SessionState::Connected,
            peer_offer: None,
            frames: 0,
            messages: 0,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Records an `open` and the offer it carried.
    pub fn open(&mut self, offer: String) {
        if self.state == SessionState::Open {
            tracing::debug!("[{}] Repeated open", self.remote_addr);
        }
        self.peer_offer = Some(offer);
        self.state = SessionState::Open;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closing;
    }

    pub fn peer_offer(&self) -> Option<&str> {
        self.peer_offer.as_deref()
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    pub fn record_message(&mut self) {
        self.messages += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Returns time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        Session::new("127.0.0.1:12345".parse().unwrap())
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = test_session();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.peer_offer().is_none());

        session.open("relp_version=0".to_string());
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.peer_offer(), Some("relp_version=0"));

        session.close();
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn test_session_counters() {
        let mut session = test_session();
        session.record_frame();
        session.record_frame();
        session.record_message();
        assert_eq!(session.frames(), 2);
        assert_eq!(session.messages(), 1);
    }

    #[test]
    fn test_session_ids_unique() {
        assert_ne!(test_session().id, test_session().id);
    }
}
