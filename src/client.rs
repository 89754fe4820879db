use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;

use crate::error::Error;
use crate::frame::{
    self, Data, GoAway, Ping, Reason, RstStream, Settings, StreamId, WindowUpdate,
};
use crate::headers::HeaderList;
use crate::proto::dispatcher::{self, Shared, WriteMessage};
use crate::proto::registry::AllocatedStream;
use crate::proto::window::{RecvWindow, SendWindow};
use crate::proto::RemoteGoAway;

/// Handle to a live HTTP/2 connection. Cheap to clone; every clone talks to
/// the same multiplexed transport.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

/// Events a stream consumer receives, in wire order.
#[derive(Debug)]
pub enum StreamEvent {
    /// The response header block.
    Headers {
        headers: HeaderList,
        end_stream: bool,
    },
    /// A chunk of the response body.
    Data { payload: Bytes, end_stream: bool },
    /// The trailing header block; the stream is done after this.
    Trailers(HeaderList),
    /// The stream was reset.
    Reset(Reason),
    /// The connection failed underneath the stream.
    Closed(Error),
}

impl StreamEvent {
    fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Headers { end_stream, .. } => *end_stream,
            StreamEvent::Data { end_stream, .. } => *end_stream,
            StreamEvent::Trailers(_) | StreamEvent::Reset(_) | StreamEvent::Closed(_) => true,
        }
    }
}

/// A measured PING round trip.
#[derive(Debug, Clone)]
pub struct PingReply {
    pub sent_at: Instant,
    pub received_at: Instant,
    pub payload: [u8; 8],
}

impl PingReply {
    pub fn rtt(&self) -> std::time::Duration {
        self.received_at.duration_since(self.sent_at)
    }
}

/// A server push: the promised request headers plus the stream the
/// response will arrive on.
#[derive(Debug)]
pub struct PushPromise {
    pub promised_id: StreamId,
    pub request: HeaderList,
    pub stream: Stream,
}

/// Receiver for server pushes; obtained once from
/// [`Client::push_promises`].
pub struct PushPromises {
    rx: mpsc::Receiver<PushPromise>,
}

impl PushPromises {
    pub async fn recv(&mut self) -> Option<PushPromise> {
        self.rx.recv().await
    }
}

/// One request stream: send side (data, trailers) and receive side
/// (events). Dropping it before completion cancels the stream with
/// RST_STREAM(CANCEL).
pub struct Stream {
    id: StreamId,
    shared: Arc<Shared>,
    events: mpsc::Receiver<StreamEvent>,
    send_window: Arc<SendWindow>,
    recv_window: Arc<RecvWindow>,
    local_ended: bool,
    remote_done: bool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("local_ended", &self.local_ended)
            .field("remote_done", &self.remote_done)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(shared: Arc<Shared>) -> Client {
        Client { shared }
    }

    /// Open a new stream: allocate the next odd id and send the request
    /// header block. Allocation and the HEADERS enqueue share one critical
    /// section, so stream ids always reach the wire in increasing order.
    pub async fn start_stream(
        &self,
        headers: HeaderList,
        end_stream: bool,
    ) -> Result<Stream, Error> {
        self.shared.check_open()?;
        let permit = self
            .shared
            .write_tx
            .reserve()
            .await
            .map_err(|_| self.closed_cause())?;

        let alloc = {
            let mut registry = self.shared.registry.lock().unwrap();
            let send_init = self
                .shared
                .remote_settings
                .read()
                .unwrap()
                .initial_window_size()
                .unwrap_or(frame::DEFAULT_INITIAL_WINDOW_SIZE);
            let recv_init = self
                .shared
                .settings_sync
                .lock()
                .unwrap()
                .committed()
                .initial_window_size()
                .unwrap_or(frame::DEFAULT_INITIAL_WINDOW_SIZE);
            let alloc = registry.allocate(
                end_stream,
                self.shared.config.mailbox_capacity,
                send_init,
                recv_init,
            )?;
            permit.send(WriteMessage::HeaderBlock {
                stream_id: alloc.id,
                headers,
                end_stream,
            });
            alloc
        };

        trace!(stream = alloc.id.as_u32(), "stream started");
        Ok(Stream::new(alloc, self.shared.clone()))
    }

    /// Send a PING and wait for its ACK, up to the configured ping timeout.
    /// A timeout fails only this ping, not the connection.
    pub async fn ping(&self, payload: [u8; 8]) -> Result<PingReply, Error> {
        self.shared.check_open()?;
        let reply = self.shared.ping_pong.lock().unwrap().register(payload);
        self.shared
            .enqueue(WriteMessage::Frame(Ping::new(payload).into()))
            .await?;

        match time::timeout(self.shared.config.ping_timeout, reply).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(self.closed_cause()),
            Err(_) => {
                self.shared.ping_pong.lock().unwrap().forget(payload);
                Err(Error::PingTimeout)
            }
        }
    }

    /// Send a SETTINGS frame. Returns once the frame is queued for writing;
    /// the values take effect when the peer's ACK arrives.
    pub async fn settings(&self, settings: Settings) -> Result<(), Error> {
        if let Some(size) = settings.initial_window_size() {
            if size > frame::MAX_INITIAL_WINDOW_SIZE {
                return Err(Error::InvalidUsage("initial window size above 2^31-1"));
            }
        }
        if let Some(size) = settings.max_frame_size() {
            if !(frame::DEFAULT_MAX_FRAME_SIZE..=frame::MAX_MAX_FRAME_SIZE).contains(&size) {
                return Err(Error::InvalidUsage("max frame size out of range"));
            }
        }

        self.shared.check_open()?;
        let permit = self
            .shared
            .write_tx
            .reserve()
            .await
            .map_err(|_| self.closed_cause())?;
        // Record before the frame can hit the wire so the ACK always finds
        // the entry.
        self.shared
            .settings_sync
            .lock()
            .unwrap()
            .sent(settings.clone());
        permit.send(WriteMessage::Frame(settings.into()));
        Ok(())
    }

    /// Initiate shutdown: send GOAWAY carrying the highest stream id the
    /// peer has used, drain the write queue, and close the transport.
    pub async fn go_away(&self, reason: Reason, debug_data: Bytes) -> Result<(), Error> {
        let last = self
            .shared
            .registry
            .lock()
            .unwrap()
            .max_received_stream_id();
        self.shared
            .enqueue(WriteMessage::GoAway {
                frame: GoAway::with_debug_data(last, reason, debug_data),
                cause: Error::GoAwayInProgress,
            })
            .await
    }

    /// Claim the receiver for server pushes. Promised streams arriving
    /// while no receiver is claimed are refused with RST_STREAM(CANCEL).
    pub fn push_promises(&self) -> PushPromises {
        let (tx, rx) = mpsc::channel(self.shared.config.mailbox_capacity);
        if self.shared.poisoned().is_none() {
            *self.shared.push_tx.lock().unwrap() = Some(tx);
        }
        PushPromises { rx }
    }

    /// The GOAWAY received from the peer, if any.
    pub fn remote_go_away(&self) -> Option<RemoteGoAway> {
        self.shared.go_away_seen.borrow().clone()
    }

    fn closed_cause(&self) -> Error {
        match self.shared.poisoned() {
            Some(cause) => Error::closed(&cause),
            None => Error::closed(&Error::GoAwayInProgress),
        }
    }
}

impl Stream {
    pub(crate) fn new(alloc: AllocatedStream, shared: Arc<Shared>) -> Stream {
        Stream {
            id: alloc.id,
            shared,
            events: alloc.events,
            send_window: alloc.send_window,
            recv_window: alloc.recv_window,
            local_ended: false,
            remote_done: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The next event on this stream, in wire order. `None` once the
    /// stream has fully finished and all events are drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        match self.events.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.remote_done = true;
                }
                Some(event)
            }
            None => {
                if !self.remote_done {
                    self.remote_done = true;
                    if let Some(cause) = self.shared.poisoned() {
                        return Some(StreamEvent::Closed(Error::closed(&cause)));
                    }
                }
                None
            }
        }
    }

    /// Send body bytes, splitting into DATA frames no larger than the
    /// peer's max frame size. Suspends until flow-control credit is
    /// available on both the stream and the connection.
    pub async fn send_data(&mut self, mut payload: Bytes, end_stream: bool) -> Result<(), Error> {
        if self.local_ended {
            return Err(Error::InvalidUsage("data after END_STREAM"));
        }

        if payload.is_empty() {
            if !end_stream {
                return Ok(());
            }
            // Zero-length DATA costs no credit.
            self.enqueue_data(Bytes::new(), true).await?;
        }

        while !payload.is_empty() {
            let max_frame = self
                .shared
                .remote_settings
                .read()
                .unwrap()
                .max_frame_size()
                .unwrap_or(frame::DEFAULT_MAX_FRAME_SIZE) as usize;
            let want = payload.len().min(max_frame);

            let granted_stream = self
                .send_window
                .reserve(want)
                .await
                .ok_or_else(|| self.failure())?;
            let granted = match self.shared.conn_send_window.reserve(granted_stream).await {
                Some(granted) => granted,
                None => {
                    return Err(self.failure());
                }
            };
            if granted < granted_stream {
                self.send_window.refund(granted_stream - granted);
            }

            let chunk = payload.split_to(granted);
            let end = end_stream && payload.is_empty();
            self.enqueue_data(chunk, end).await?;
        }

        if end_stream {
            self.local_ended = true;
            self.shared.registry.lock().unwrap().send_close(self.id);
        }
        Ok(())
    }

    async fn enqueue_data(&self, chunk: Bytes, end_stream: bool) -> Result<(), Error> {
        self.shared
            .enqueue(WriteMessage::Frame(
                Data::new(self.id, chunk, end_stream).into(),
            ))
            .await
    }

    /// Send a trailing header block, ending the local side.
    pub async fn send_trailers(&mut self, headers: HeaderList) -> Result<(), Error> {
        if self.local_ended {
            return Err(Error::InvalidUsage("trailers after END_STREAM"));
        }
        self.shared
            .enqueue(WriteMessage::HeaderBlock {
                stream_id: self.id,
                headers,
                end_stream: true,
            })
            .await?;
        self.local_ended = true;
        self.shared.registry.lock().unwrap().send_close(self.id);
        Ok(())
    }

    /// Hand back receive credit for `n` consumed body bytes. The credit is
    /// advertised as WINDOW_UPDATE frames either immediately (once half the
    /// window has accumulated) or on the next flow-control tick.
    pub fn release_capacity(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let flush_stream = self.recv_window.release(n);
        let flush_conn = self.shared.conn_recv_window.release(n);

        if flush_stream {
            if let Ok(permit) = self.shared.write_tx.try_reserve() {
                if let Some(increment) = self.recv_window.take_update() {
                    permit.send(WriteMessage::Frame(
                        WindowUpdate::new(self.id, increment).into(),
                    ));
                }
            }
        }
        if flush_conn {
            dispatcher::flush_connection_credit(&self.shared);
        }
    }

    fn failure(&self) -> Error {
        match self.shared.poisoned() {
            Some(cause) => Error::closed(&cause),
            None => Error::StreamReset(Reason::STREAM_CLOSED),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.local_ended && self.remote_done {
            return;
        }
        let live = {
            let mut registry = self.shared.registry.lock().unwrap();
            let live = registry.get(self.id).is_some();
            if live {
                registry.reset(self.id);
            }
            live
        };
        if live {
            trace!(stream = self.id.as_u32(), "stream cancelled on drop");
            let _ = self.shared.write_tx.try_send(WriteMessage::Frame(
                RstStream::new(self.id, Reason::CANCEL).into(),
            ));
        }
    }
}

/// Handle on the background connection tasks.
pub struct Connection {
    poison: watch::Receiver<Option<Error>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn new(poison: watch::Receiver<Option<Error>>, tasks: Vec<JoinHandle<()>>) -> Self {
        Connection { poison, tasks }
    }

    /// Resolves with the poisoning cause once the connection has failed or
    /// been shut down.
    pub async fn closed(&mut self) -> Error {
        loop {
            if let Some(cause) = self.poison.borrow().clone() {
                return cause;
            }
            if self.poison.changed().await.is_err() {
                return Error::GoAwayInProgress;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.poison.borrow().is_some()
    }

    /// Abort the background tasks without a GOAWAY.
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
