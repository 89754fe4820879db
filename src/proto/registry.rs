//! The stream registry: id allocation, per-stream mailboxes, the RFC 7540
//! §5.1 state machine, and closure bookkeeping.
//!
//! All operations are O(1)-ish and run under one std mutex that is never
//! held across an await point. The dispatcher routes frames by looking the
//! target stream up here and enqueueing into its mailbox directly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::window::{RecvWindow, SendWindow};
use super::{RemoteGoAway, WindowSize};
use crate::client::StreamEvent;
use crate::error::Error;
use crate::frame::{Reason, StreamId};

/// Stream states per RFC 7540 §5.1, restricted to those reachable by a
/// client (local `ReservedLocal` would require us to push).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    Idle,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// END_STREAM sent by us.
    fn send_close(&mut self) {
        *self = match *self {
            StreamState::Idle | StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// END_STREAM received from the peer.
    fn recv_close(&mut self) {
        *self = match *self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// May the peer still send us HEADERS or DATA on this stream?
    fn can_recv(&self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::ReservedRemote
        )
    }
}

pub(crate) struct StreamEntry {
    pub state: StreamState,
    pub mailbox: mpsc::Sender<StreamEvent>,
    pub send_window: Arc<SendWindow>,
    pub recv_window: Arc<RecvWindow>,
    /// First HEADERS block seen; a later one is trailers.
    pub headers_seen: bool,
    /// Counts against the peer's MAX_CONCURRENT_STREAMS.
    counted: bool,
}

/// What to do with a frame for a stream the registry no longer knows.
pub(crate) enum Lookup<'a> {
    Entry(&'a mut StreamEntry),
    /// Closed within the grace window; drop the frame silently.
    RecentlyClosed,
    /// Never existed or reaped long ago.
    Unknown,
}

pub(crate) struct Registry {
    streams: IndexMap<StreamId, StreamEntry>,
    /// Next client stream id to hand out; `None` once exhausted.
    next_stream_id: Option<StreamId>,
    /// Peer's MAX_CONCURRENT_STREAMS bound on our openings.
    max_send_streams: usize,
    num_send_streams: usize,
    /// Highest stream id observed from the peer, for GOAWAY emission.
    max_received_stream_id: StreamId,
    /// PUSH_PROMISE ids must strictly increase.
    last_promised_id: StreamId,
    recently_closed: VecDeque<(StreamId, Instant)>,
    reset_stream_max: usize,
    reset_stream_duration: Duration,
    go_away: Option<RemoteGoAway>,
}

impl Registry {
    pub fn new(
        max_send_streams: usize,
        reset_stream_max: usize,
        reset_stream_duration: Duration,
    ) -> Registry {
        Registry {
            streams: IndexMap::new(),
            next_stream_id: Some(StreamId::from(1)),
            max_send_streams,
            num_send_streams: 0,
            max_received_stream_id: StreamId::ZERO,
            last_promised_id: StreamId::ZERO,
            recently_closed: VecDeque::new(),
            reset_stream_max,
            reset_stream_duration,
            go_away: None,
        }
    }

    // ===== allocation =====

    /// Allocate the next odd stream id and register its entry. Called with
    /// the HEADERS enqueue in the same critical section so ids hit the wire
    /// in increasing order.
    pub fn allocate(
        &mut self,
        end_stream: bool,
        mailbox_capacity: usize,
        send_init: WindowSize,
        recv_init: WindowSize,
    ) -> Result<AllocatedStream, Error> {
        if self.go_away.is_some() {
            return Err(Error::GoAwayInProgress);
        }
        let id = self.next_stream_id.ok_or(Error::StreamIdExhausted)?;
        if self.num_send_streams >= self.max_send_streams {
            return Err(Error::TooManyStreams);
        }

        self.next_stream_id = id.next_id();
        self.num_send_streams += 1;

        let (tx, rx) = mpsc::channel(mailbox_capacity);
        let entry = StreamEntry {
            state: if end_stream {
                StreamState::HalfClosedLocal
            } else {
                StreamState::Open
            },
            mailbox: tx,
            send_window: Arc::new(SendWindow::new(send_init)),
            recv_window: Arc::new(RecvWindow::new(recv_init)),
            headers_seen: false,
            counted: true,
        };
        let send_window = entry.send_window.clone();
        let recv_window = entry.recv_window.clone();
        self.streams.insert(id, entry);
        trace!(stream = id.as_u32(), "stream allocated");

        Ok(AllocatedStream {
            id,
            send_window,
            recv_window,
            events: rx,
        })
    }

    /// Reserve a server-pushed stream in `ReservedRemote`.
    pub fn reserve_push(
        &mut self,
        parent: StreamId,
        promised: StreamId,
        mailbox_capacity: usize,
        send_init: WindowSize,
        recv_init: WindowSize,
    ) -> Result<AllocatedStream, Error> {
        if !promised.is_server_initiated() || promised <= self.last_promised_id {
            proto_err!(conn: "invalid promised stream id {:?}", promised);
            return Err(Error::Protocol(Reason::PROTOCOL_ERROR));
        }
        match self.streams.get(&parent) {
            Some(entry) if entry.state.can_recv() => {}
            _ => {
                proto_err!(conn: "push promise on inactive stream {:?}", parent);
                return Err(Error::Protocol(Reason::PROTOCOL_ERROR));
            }
        }

        self.last_promised_id = promised;

        let (tx, rx) = mpsc::channel(mailbox_capacity);
        let entry = StreamEntry {
            state: StreamState::ReservedRemote,
            mailbox: tx,
            send_window: Arc::new(SendWindow::new(send_init)),
            recv_window: Arc::new(RecvWindow::new(recv_init)),
            headers_seen: false,
            counted: false,
        };
        let send_window = entry.send_window.clone();
        let recv_window = entry.recv_window.clone();
        self.streams.insert(promised, entry);

        Ok(AllocatedStream {
            id: promised,
            send_window,
            recv_window,
            events: rx,
        })
    }

    // ===== lookup =====

    pub fn lookup(&mut self, id: StreamId) -> Lookup<'_> {
        // Split borrow dance: membership first, then the entry.
        if self.streams.contains_key(&id) {
            return Lookup::Entry(self.streams.get_mut(&id).unwrap());
        }
        if self.recently_closed.iter().any(|&(rid, _)| rid == id) {
            Lookup::RecentlyClosed
        } else {
            Lookup::Unknown
        }
    }

    pub fn get(&mut self, id: StreamId) -> Option<&mut StreamEntry> {
        self.streams.get_mut(&id)
    }

    /// Track the highest stream id the peer has referenced.
    pub fn observe(&mut self, id: StreamId) {
        if id > self.max_received_stream_id {
            self.max_received_stream_id = id;
        }
    }

    pub fn max_received_stream_id(&self) -> StreamId {
        self.max_received_stream_id
    }

    // ===== state transitions =====

    /// We sent END_STREAM. Removes the entry when the stream fully closes;
    /// the consumer keeps draining its mailbox.
    pub fn send_close(&mut self, id: StreamId) {
        if let Some(entry) = self.streams.get_mut(&id) {
            entry.state.send_close();
            if entry.state.is_closed() {
                self.remove(id);
            }
        }
    }

    /// The peer sent END_STREAM.
    pub fn recv_close(&mut self, id: StreamId) {
        if let Some(entry) = self.streams.get_mut(&id) {
            entry.state.recv_close();
            if entry.state.is_closed() {
                self.remove(id);
            }
        }
    }

    /// RST_STREAM, either direction: the stream is dead immediately.
    pub fn reset(&mut self, id: StreamId) {
        if self.streams.contains_key(&id) {
            self.remove(id);
        }
    }

    fn remove(&mut self, id: StreamId) {
        let Some(entry) = self.streams.shift_remove(&id) else {
            return;
        };
        if entry.counted {
            debug_assert!(self.num_send_streams > 0);
            self.num_send_streams -= 1;
        }
        entry.send_window.poison();
        trace!(stream = id.as_u32(), "stream removed");

        self.recently_closed.push_back((id, Instant::now()));
        while self.recently_closed.len() > self.reset_stream_max {
            self.recently_closed.pop_front();
        }
    }

    /// Reap grace-window entries older than the configured duration.
    pub fn reap_closed(&mut self, now: Instant) {
        while let Some(&(_, at)) = self.recently_closed.front() {
            if now.duration_since(at) >= self.reset_stream_duration {
                self.recently_closed.pop_front();
            } else {
                break;
            }
        }
    }

    // ===== settings =====

    pub fn set_max_send_streams(&mut self, max: usize) {
        self.max_send_streams = max;
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE delta to every stream's send
    /// window. Overflow anywhere fails the connection.
    pub fn adjust_send_windows(&mut self, delta: i64) -> Result<(), Error> {
        for entry in self.streams.values() {
            entry.send_window.adjust(delta)?;
        }
        Ok(())
    }

    /// Apply a committed local INITIAL_WINDOW_SIZE to every receive window.
    pub fn retarget_recv_windows(&mut self, target: WindowSize) {
        for entry in self.streams.values() {
            entry.recv_window.set_target(target);
        }
    }

    /// Collect pending per-stream WINDOW_UPDATE increments for the ticker.
    pub fn take_window_updates(&mut self) -> Vec<(StreamId, WindowSize)> {
        self.streams
            .iter()
            .filter_map(|(&id, entry)| entry.recv_window.take_update().map(|inc| (id, inc)))
            .collect()
    }

    // ===== shutdown =====

    /// The peer told us to go away. Streams above `last_stream_id` are
    /// refused; the rest run to completion. Returns the mailboxes of the
    /// refused streams so the caller can deliver the terminal event.
    pub fn apply_go_away(&mut self, remote: RemoteGoAway) -> Vec<mpsc::Sender<StreamEvent>> {
        let last = remote.last_stream_id;
        self.go_away = Some(remote);

        let refused: Vec<StreamId> = self
            .streams
            .keys()
            .filter(|id| id.is_client_initiated() && **id > last)
            .copied()
            .collect();

        let mut mailboxes = Vec::with_capacity(refused.len());
        for id in refused {
            debug!(stream = id.as_u32(), "stream refused by GOAWAY");
            if let Some(entry) = self.streams.get(&id) {
                mailboxes.push(entry.mailbox.clone());
            }
            self.remove(id);
        }
        mailboxes
    }

    pub fn go_away(&self) -> Option<&RemoteGoAway> {
        self.go_away.as_ref()
    }

    /// Connection teardown: drop every entry, waking blocked senders.
    /// Returns the mailboxes so terminal events can be delivered outside
    /// the lock.
    pub fn terminate_all(&mut self) -> Vec<mpsc::Sender<StreamEvent>> {
        let mailboxes = self
            .streams
            .values()
            .map(|entry| entry.mailbox.clone())
            .collect();
        for (_, entry) in self.streams.drain(..) {
            entry.send_window.poison();
        }
        self.num_send_streams = 0;
        mailboxes
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.streams.len()
    }
}

pub(crate) struct AllocatedStream {
    pub id: StreamId,
    pub send_window: Arc<SendWindow>,
    pub recv_window: Arc<RecvWindow>,
    pub events: mpsc::Receiver<StreamEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(100, 50, Duration::from_secs(1))
    }

    #[test]
    fn ids_are_odd_and_increasing() {
        let mut reg = registry();
        let a = reg.allocate(false, 8, 65_535, 65_535).unwrap();
        let b = reg.allocate(false, 8, 65_535, 65_535).unwrap();
        let c = reg.allocate(true, 8, 65_535, 65_535).unwrap();
        assert_eq!(a.id, StreamId::from(1));
        assert_eq!(b.id, StreamId::from(3));
        assert_eq!(c.id, StreamId::from(5));
    }

    #[test]
    fn concurrency_bound_is_enforced() {
        let mut reg = Registry::new(2, 50, Duration::from_secs(1));
        reg.allocate(false, 8, 0, 0).unwrap();
        reg.allocate(false, 8, 0, 0).unwrap();
        assert!(matches!(
            reg.allocate(false, 8, 0, 0),
            Err(Error::TooManyStreams)
        ));
    }

    #[test]
    fn closing_a_stream_frees_a_slot() {
        let mut reg = Registry::new(1, 50, Duration::from_secs(1));
        let a = reg.allocate(true, 8, 0, 0).unwrap();
        // Half closed local; peer finishes it.
        reg.recv_close(a.id);
        assert_eq!(reg.len(), 0);
        reg.allocate(false, 8, 0, 0).unwrap();
    }

    #[test]
    fn grace_window_distinguishes_recent_from_unknown() {
        let mut reg = registry();
        let a = reg.allocate(true, 8, 0, 0).unwrap();
        reg.reset(a.id);
        assert!(matches!(reg.lookup(a.id), Lookup::RecentlyClosed));
        assert!(matches!(reg.lookup(StreamId::from(99)), Lookup::Unknown));

        reg.reap_closed(Instant::now() + Duration::from_secs(2));
        assert!(matches!(reg.lookup(a.id), Lookup::Unknown));
    }

    #[test]
    fn go_away_refuses_only_higher_streams() {
        let mut reg = registry();
        let _s1 = reg.allocate(false, 8, 0, 0).unwrap();
        let _s3 = reg.allocate(false, 8, 0, 0).unwrap();
        let _s5 = reg.allocate(false, 8, 0, 0).unwrap();

        let refused = reg.apply_go_away(RemoteGoAway {
            last_stream_id: StreamId::from(3),
            reason: Reason::NO_ERROR,
            debug_data: Default::default(),
        });
        assert_eq!(refused.len(), 1);
        assert_eq!(reg.len(), 2);
        assert!(matches!(
            reg.allocate(false, 8, 0, 0),
            Err(Error::GoAwayInProgress)
        ));
    }

    #[test]
    fn push_ids_must_increase() {
        let mut reg = registry();
        let parent = reg.allocate(false, 8, 0, 0).unwrap();
        reg.reserve_push(parent.id, StreamId::from(4), 8, 0, 0)
            .unwrap();
        assert!(reg
            .reserve_push(parent.id, StreamId::from(2), 8, 0, 0)
            .is_err());
        reg.reserve_push(parent.id, StreamId::from(6), 8, 0, 0)
            .unwrap();
    }

    #[test]
    fn observe_tracks_peak() {
        let mut reg = registry();
        reg.observe(StreamId::from(4));
        reg.observe(StreamId::from(2));
        assert_eq!(reg.max_received_stream_id(), StreamId::from(4));
    }
}
