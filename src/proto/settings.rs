use std::collections::VecDeque;

use tracing::trace;

use crate::error::Error;
use crate::frame::{Reason, Settings};

/// Local SETTINGS sync state with the remote.
///
/// Every SETTINGS frame we send is queued here until the peer's ACK comes
/// back; only then do the values take effect on our side (decoder table
/// bound, read-side frame size, receive windows). ACKs apply in FIFO order.
#[derive(Debug)]
pub(crate) struct SettingsHandler {
    /// Sent, not yet acknowledged. The initial handshake SETTINGS frame is
    /// queued at construction since it is flushed before the writer task
    /// starts.
    waiting_ack: VecDeque<Settings>,
    /// The merged view of everything the peer has acknowledged.
    committed: Settings,
}

impl SettingsHandler {
    pub fn new(initial: Settings) -> SettingsHandler {
        let mut waiting_ack = VecDeque::new();
        waiting_ack.push_back(initial);
        SettingsHandler {
            waiting_ack,
            committed: Settings::default(),
        }
    }

    /// Track a SETTINGS frame the user has enqueued for sending.
    pub fn sent(&mut self, settings: Settings) {
        self.waiting_ack.push_back(settings);
    }

    /// The peer acknowledged our oldest outstanding SETTINGS; commit it and
    /// return the newly effective merged state.
    pub fn recv_ack(&mut self) -> Result<&Settings, Error> {
        match self.waiting_ack.pop_front() {
            Some(settings) => {
                self.committed.merge(&settings);
                trace!(settings = ?self.committed, "local settings in effect");
                Ok(&self.committed)
            }
            None => {
                // We haven't sent any SETTINGS frames to be ACKed, so
                // this is very bizarre! Remote is either buggy or malicious.
                proto_err!(conn: "received unexpected settings ack");
                Err(Error::Protocol(Reason::PROTOCOL_ERROR))
            }
        }
    }

    /// The settings the peer has committed to honoring.
    pub fn committed(&self) -> &Settings {
        &self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acks_commit_in_fifo_order() {
        let mut initial = Settings::default();
        initial.set_initial_window_size(Some(100));
        let mut handler = SettingsHandler::new(initial);

        let mut second = Settings::default();
        second.set_initial_window_size(Some(200));
        handler.sent(second);

        assert_eq!(handler.recv_ack().unwrap().initial_window_size(), Some(100));
        assert_eq!(handler.recv_ack().unwrap().initial_window_size(), Some(200));
    }

    #[test]
    fn unexpected_ack_is_protocol_error() {
        let mut handler = SettingsHandler::new(Settings::default());
        handler.recv_ack().unwrap();
        assert!(matches!(
            handler.recv_ack(),
            Err(Error::Protocol(Reason::PROTOCOL_ERROR))
        ));
    }
}
