//! The connection dispatcher: one reader task fanning inbound frames out to
//! stream mailboxes and the control plane, one writer task serializing
//! outbound frames, a flow-control ticker, and an optional ping scheduler.
//!
//! The HPACK decoder lives in the reader and the encoder in the writer, so
//! both sides of the compression state are driven strictly in wire order.

use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, trace, warn};

use super::ping_pong::{PingPong, ReceivedPing};
use super::registry::{Lookup, Registry, StreamState};
use super::settings::SettingsHandler;
use super::window::{RecvWindow, SendWindow};
use super::RemoteGoAway;
use crate::client::{PushPromise, Stream, StreamEvent};
use crate::codec::{FrameReader, FrameWriter};
use crate::error::Error;
use crate::frame::{
    self, Continuation, Frame, GoAway, Headers, Ping, Reason, RstStream, Settings, StreamId,
    WindowUpdate,
};
use crate::headers::HeaderList;
use crate::hpack::{Decoder, Encoder};

/// Callback for frames nothing else claims: unknown types and PRIORITY.
pub(crate) type FallbackSink = Box<dyn Fn(Frame) + Send + Sync>;

/// Resolved connection configuration, produced by the builder.
#[derive(Clone)]
pub(crate) struct Config {
    pub local_settings: Settings,
    pub initial_connection_window_size: Option<u32>,
    pub ping_interval: Option<Duration>,
    pub ping_timeout: Duration,
    pub flow_update_interval: Duration,
    pub write_queue_depth: usize,
    pub mailbox_capacity: usize,
}

/// A unit of work for the writer task.
pub(crate) enum WriteMessage {
    /// A single pre-built frame.
    Frame(Frame),
    /// A header block to HPACK-encode in queue order and emit as one
    /// HEADERS + CONTINUATION* group.
    HeaderBlock {
        stream_id: StreamId,
        headers: HeaderList,
        end_stream: bool,
    },
    /// Encoder-side effects of a remote SETTINGS frame, applied in queue
    /// order relative to the header blocks around it.
    ApplyEncoder {
        header_table_size: Option<u32>,
        max_frame_size: Option<u32>,
    },
    /// Write the frame, flush, shut the transport down, and poison the
    /// connection with `cause`.
    GoAway { frame: GoAway, cause: Error },
}

/// State shared by the tasks and every client handle.
pub(crate) struct Shared {
    pub write_tx: mpsc::Sender<WriteMessage>,
    pub registry: StdMutex<Registry>,
    pub conn_send_window: SendWindow,
    pub conn_recv_window: RecvWindow,
    /// The peer's settings; merged the moment a SETTINGS frame is accepted.
    pub remote_settings: RwLock<Settings>,
    pub settings_sync: StdMutex<SettingsHandler>,
    pub ping_pong: StdMutex<PingPong>,
    /// First connection-fatal error; set exactly once.
    pub poison: watch::Sender<Option<Error>>,
    pub go_away_seen: watch::Sender<Option<RemoteGoAway>>,
    /// Claimed by `Client::push_promises`; promised streams are refused
    /// while unclaimed.
    pub push_tx: StdMutex<Option<mpsc::Sender<PushPromise>>>,
    pub fallback: Option<FallbackSink>,
    pub config: Config,
}

impl Shared {
    pub fn poisoned(&self) -> Option<Error> {
        self.poison.borrow().clone()
    }

    pub fn check_open(&self) -> Result<(), Error> {
        match self.poisoned() {
            Some(cause) => Err(Error::closed(&cause)),
            None => Ok(()),
        }
    }

    /// Record the first connection-fatal error and tear the stream fan-out
    /// down. Later calls are no-ops; the first cause wins.
    pub fn poison(&self, err: Error) {
        let newly = self.poison.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(err.clone());
                true
            } else {
                false
            }
        });
        if !newly {
            return;
        }
        debug!(cause = %err, "connection poisoned");

        self.conn_send_window.poison();
        let mailboxes = self.registry.lock().unwrap().terminate_all();
        for mailbox in mailboxes {
            // Queue space may be gone; consumers also learn the cause from
            // the poison watch once their mailbox drains.
            let _ = mailbox.try_send(StreamEvent::Closed(Error::closed(&err)));
        }
        // Ends the push receiver, if claimed, and fails outstanding pings.
        self.push_tx.lock().unwrap().take();
        self.ping_pong.lock().unwrap().clear_pending();
    }

    pub async fn enqueue(&self, msg: WriteMessage) -> Result<(), Error> {
        self.check_open()?;
        self.write_tx.send(msg).await.map_err(|_| match self.poisoned() {
            Some(cause) => Error::closed(&cause),
            None => Error::Transport(Arc::new(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "writer task gone",
            ))),
        })
    }
}

/// Emit a GOAWAY advertising `err` where one applies, then poison.
pub(crate) async fn fail_connection(shared: &Arc<Shared>, err: Error) {
    if let Some(reason) = err.reason() {
        let last = shared.registry.lock().unwrap().max_received_stream_id();
        let _ = shared
            .write_tx
            .send(WriteMessage::GoAway {
                frame: GoAway::new(last, reason),
                cause: err.clone(),
            })
            .await;
    }
    shared.poison(err);
}

// ===== writer task =====

struct Writer<W> {
    io: FrameWriter<W>,
    encoder: Encoder,
    max_frame_size: usize,
    shared: Arc<Shared>,
}

impl<W> Writer<W>
where
    W: AsyncWrite + Unpin,
{
    /// Returns false once the loop should stop.
    async fn handle(&mut self, msg: WriteMessage) -> bool {
        let result = match msg {
            WriteMessage::Frame(frame) => self.io.write_frame(&frame).await,
            WriteMessage::HeaderBlock {
                stream_id,
                headers,
                end_stream,
            } => {
                let group = encode_header_block(
                    &mut self.encoder,
                    stream_id,
                    &headers,
                    end_stream,
                    self.max_frame_size,
                );
                self.io.write_frames(&group).await
            }
            WriteMessage::ApplyEncoder {
                header_table_size,
                max_frame_size,
            } => {
                if let Some(size) = header_table_size {
                    self.encoder.update_max_size(size as usize);
                }
                if let Some(size) = max_frame_size {
                    self.max_frame_size = size as usize;
                }
                Ok(())
            }
            WriteMessage::GoAway { frame, cause } => {
                let result = self.io.write_frame(&frame.into()).await;
                let _ = self.io.shutdown().await;
                if let Err(e) = result {
                    warn!(error = %e, "goaway write failed");
                }
                self.shared.poison(cause);
                return false;
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.shared.poison(e);
                false
            }
        }
    }
}

pub(crate) async fn writer_loop<W>(
    io: FrameWriter<W>,
    mut rx: mpsc::Receiver<WriteMessage>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    let mut poison_rx = shared.poison.subscribe();
    let mut writer = Writer {
        io,
        encoder: Encoder::new(frame::DEFAULT_HEADER_TABLE_SIZE as usize),
        max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE as usize,
        shared,
    };

    'outer: loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if !writer.handle(msg).await {
                        break;
                    }
                }
                None => break,
            },
            _ = poison_rx.changed() => {
                // Drain what is already queued (a GOAWAY may be in
                // flight), then stop.
                while let Ok(msg) = rx.try_recv() {
                    if !writer.handle(msg).await {
                        break 'outer;
                    }
                }
                break;
            }
        }
    }
    trace!("writer task done");
}

/// Encode one header block and frame it as HEADERS + CONTINUATION*, each
/// fragment at most `max_frame_size`.
fn encode_header_block(
    encoder: &mut Encoder,
    stream_id: StreamId,
    headers: &HeaderList,
    end_stream: bool,
    max_frame_size: usize,
) -> Vec<Frame> {
    let mut fragment = encoder.encode(headers);
    let first_len = fragment.len().min(max_frame_size);
    let first = fragment.split_to(first_len);

    let mut group = vec![Frame::Headers(Headers::new(
        stream_id,
        first,
        end_stream,
        fragment.is_empty(),
    ))];

    while !fragment.is_empty() {
        let len = fragment.len().min(max_frame_size);
        let chunk = fragment.split_to(len);
        group.push(Frame::Continuation(Continuation::new(
            stream_id,
            chunk,
            fragment.is_empty(),
        )));
    }

    group
}

// ===== reader task =====

/// A header block being assembled from HEADERS/PUSH_PROMISE plus
/// CONTINUATION frames. While one is open, no other frame may arrive on any
/// stream.
struct PartialBlock {
    stream_id: StreamId,
    kind: BlockKind,
    fragments: BytesMut,
}

enum BlockKind {
    Response { end_stream: bool },
    Push { promised_id: StreamId },
}

pub(crate) async fn reader_loop<R>(mut reader: FrameReader<R>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Decoder::new(frame::DEFAULT_HEADER_TABLE_SIZE as usize);
    let mut block: Option<PartialBlock> = None;

    loop {
        if shared.poisoned().is_some() {
            break;
        }
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                fail_connection(&shared, e).await;
                break;
            }
        };

        if let Err(e) = process_frame(&shared, &mut reader, &mut decoder, &mut block, frame).await {
            fail_connection(&shared, e).await;
            break;
        }
    }
    trace!("reader task done");
}

async fn process_frame<R>(
    shared: &Arc<Shared>,
    reader: &mut FrameReader<R>,
    decoder: &mut Decoder,
    block: &mut Option<PartialBlock>,
    frame: Frame,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let stream_id = frame.stream_id();
    if !stream_id.is_zero() {
        shared.registry.lock().unwrap().observe(stream_id);
    }

    // A header block is atomic: between its first frame and END_HEADERS the
    // only legal frame on the whole connection is a CONTINUATION for the
    // same stream.
    if let Some(partial) = block.take() {
        match frame {
            Frame::Continuation(cont) if cont.stream_id() == partial.stream_id => {
                return append_continuation(shared, decoder, block, partial, cont).await;
            }
            other => {
                proto_err!(conn: "expected CONTINUATION for stream {:?}, got {:?}",
                    partial.stream_id, other.stream_id());
                return Err(Error::Protocol(Reason::PROTOCOL_ERROR));
            }
        }
    }

    match frame {
        Frame::Settings(settings) => recv_settings(shared, reader, decoder, settings).await,
        Frame::Ping(ping) => recv_ping(shared, ping).await,
        Frame::GoAway(go_away) => recv_go_away(shared, go_away).await,
        Frame::WindowUpdate(update) => recv_window_update(shared, update).await,
        Frame::Data(data) => recv_data(shared, data).await,
        Frame::Headers(headers) => {
            let partial = PartialBlock {
                stream_id: headers.stream_id(),
                kind: BlockKind::Response {
                    end_stream: headers.is_end_stream(),
                },
                fragments: BytesMut::from(headers.fragment().as_ref()),
            };
            finish_or_stash(shared, decoder, block, partial, headers.is_end_headers()).await
        }
        Frame::PushPromise(promise) => {
            shared
                .registry
                .lock()
                .unwrap()
                .observe(promise.promised_id());
            let partial = PartialBlock {
                stream_id: promise.stream_id(),
                kind: BlockKind::Push {
                    promised_id: promise.promised_id(),
                },
                fragments: BytesMut::from(promise.fragment().as_ref()),
            };
            finish_or_stash(shared, decoder, block, partial, promise.is_end_headers()).await
        }
        Frame::Continuation(cont) => {
            proto_err!(conn: "CONTINUATION without open header block on stream {:?}",
                cont.stream_id());
            Err(Error::Protocol(Reason::PROTOCOL_ERROR))
        }
        Frame::Reset(rst) => recv_reset(shared, rst).await,
        other @ (Frame::Priority(_) | Frame::Unknown(_)) => {
            match &shared.fallback {
                Some(sink) => sink(other),
                None => trace!("dropping unhandled frame"),
            }
            Ok(())
        }
    }
}

fn check_block_size(shared: &Shared, partial: &PartialBlock) -> Result<(), Error> {
    let bound = shared
        .config
        .local_settings
        .max_header_list_size()
        .unwrap_or(u32::MAX) as usize;
    if partial.fragments.len() > bound {
        proto_err!(conn: "header block exceeds {} octets", bound);
        return Err(Error::Protocol(Reason::COMPRESSION_ERROR));
    }
    Ok(())
}

async fn append_continuation(
    shared: &Arc<Shared>,
    decoder: &mut Decoder,
    block: &mut Option<PartialBlock>,
    mut partial: PartialBlock,
    cont: Continuation,
) -> Result<(), Error> {
    partial.fragments.extend_from_slice(cont.fragment());
    check_block_size(shared, &partial)?;
    finish_or_stash(shared, decoder, block, partial, cont.is_end_headers()).await
}

async fn finish_or_stash(
    shared: &Arc<Shared>,
    decoder: &mut Decoder,
    block: &mut Option<PartialBlock>,
    partial: PartialBlock,
    end_headers: bool,
) -> Result<(), Error> {
    check_block_size(shared, &partial)?;
    if !end_headers {
        *block = Some(partial);
        return Ok(());
    }

    // END_HEADERS: decode now, in wire order.
    let headers = decoder.decode(&partial.fragments)?;
    if headers.wire_size()
        > shared
            .config
            .local_settings
            .max_header_list_size()
            .unwrap_or(u32::MAX) as usize
    {
        proto_err!(conn: "decoded header list too large");
        return Err(Error::Protocol(Reason::COMPRESSION_ERROR));
    }

    match partial.kind {
        BlockKind::Response { end_stream } => {
            deliver_headers(shared, partial.stream_id, headers, end_stream).await
        }
        BlockKind::Push { promised_id } => {
            deliver_push(shared, partial.stream_id, promised_id, headers).await
        }
    }
}

enum HeadersOutcome {
    Deliver(mpsc::Sender<StreamEvent>, StreamEvent),
    StreamClosed,
    RecentlyClosed,
    Unknown,
}

async fn deliver_headers(
    shared: &Arc<Shared>,
    stream_id: StreamId,
    headers: HeaderList,
    end_stream: bool,
) -> Result<(), Error> {
    let outcome = {
        let mut registry = shared.registry.lock().unwrap();
        match registry.lookup(stream_id) {
            Lookup::Entry(entry) => {
                if entry.state == StreamState::HalfClosedRemote {
                    HeadersOutcome::StreamClosed
                } else {
                    if entry.state == StreamState::ReservedRemote {
                        // The promised response begins.
                        entry.state = StreamState::HalfClosedLocal;
                    }
                    let event = if entry.headers_seen {
                        StreamEvent::Trailers(headers)
                    } else {
                        entry.headers_seen = true;
                        StreamEvent::Headers {
                            headers,
                            end_stream,
                        }
                    };
                    let mailbox = entry.mailbox.clone();
                    if end_stream {
                        registry.recv_close(stream_id);
                    }
                    HeadersOutcome::Deliver(mailbox, event)
                }
            }
            Lookup::RecentlyClosed => HeadersOutcome::RecentlyClosed,
            Lookup::Unknown => HeadersOutcome::Unknown,
        }
    };

    match outcome {
        HeadersOutcome::Deliver(mailbox, event) => {
            // Mailboxes are bounded: a stalled consumer backpressures the
            // reader, which stops the peer through flow control.
            let _ = mailbox.send(event).await;
            Ok(())
        }
        HeadersOutcome::StreamClosed => {
            stream_error(shared, stream_id, Reason::STREAM_CLOSED).await
        }
        HeadersOutcome::RecentlyClosed => {
            trace!(stream = stream_id.as_u32(), "headers for closed stream dropped");
            Ok(())
        }
        HeadersOutcome::Unknown => {
            proto_err!(stream: "headers for unknown stream {:?}", stream_id);
            stream_error(shared, stream_id, Reason::STREAM_CLOSED).await
        }
    }
}

async fn deliver_push(
    shared: &Arc<Shared>,
    parent: StreamId,
    promised_id: StreamId,
    request: HeaderList,
) -> Result<(), Error> {
    if !shared.config.local_settings.is_push_enabled() {
        proto_err!(conn: "push promise received with push disabled");
        return Err(Error::Protocol(Reason::PROTOCOL_ERROR));
    }

    let alloc = {
        let mut registry = shared.registry.lock().unwrap();
        let send_init = shared
            .remote_settings
            .read()
            .unwrap()
            .initial_window_size()
            .unwrap_or(frame::DEFAULT_INITIAL_WINDOW_SIZE);
        let recv_init = shared
            .settings_sync
            .lock()
            .unwrap()
            .committed()
            .initial_window_size()
            .unwrap_or(frame::DEFAULT_INITIAL_WINDOW_SIZE);
        registry.reserve_push(
            parent,
            promised_id,
            shared.config.mailbox_capacity,
            send_init,
            recv_init,
        )?
    };

    let sink = shared.push_tx.lock().unwrap().clone();
    let stream = Stream::new(alloc, shared.clone());
    let promise = PushPromise {
        promised_id,
        request,
        stream,
    };

    match sink {
        Some(sink) if sink.try_send(promise).is_ok() => Ok(()),
        _ => {
            // Nobody is listening for pushes; refuse the reservation.
            debug!(stream = promised_id.as_u32(), "push promise refused");
            shared.registry.lock().unwrap().reset(promised_id);
            shared
                .enqueue(WriteMessage::Frame(
                    RstStream::new(promised_id, Reason::CANCEL).into(),
                ))
                .await
        }
    }
}

enum DataOutcome {
    Deliver(mpsc::Sender<StreamEvent>, StreamEvent),
    StreamClosed,
    RecentlyClosed,
    Unknown,
}

async fn recv_data(shared: &Arc<Shared>, data: frame::Data) -> Result<(), Error> {
    let stream_id = data.stream_id();
    let flow_len = data.flow_len();
    let end_stream = data.is_end_stream();
    shared.conn_recv_window.recv_data(flow_len)?;

    let outcome = {
        let mut registry = shared.registry.lock().unwrap();
        match registry.lookup(stream_id) {
            Lookup::Entry(entry) => {
                if entry.state == StreamState::HalfClosedRemote {
                    DataOutcome::StreamClosed
                } else {
                    entry.recv_window.recv_data(flow_len)?;
                    let mailbox = entry.mailbox.clone();
                    let event = StreamEvent::Data {
                        payload: data.into_payload(),
                        end_stream,
                    };
                    if end_stream {
                        registry.recv_close(stream_id);
                    }
                    DataOutcome::Deliver(mailbox, event)
                }
            }
            Lookup::RecentlyClosed => DataOutcome::RecentlyClosed,
            Lookup::Unknown => DataOutcome::Unknown,
        }
    };

    match outcome {
        DataOutcome::Deliver(mailbox, event) => {
            let _ = mailbox.send(event).await;
            Ok(())
        }
        DataOutcome::StreamClosed => {
            release_connection_credit(shared, flow_len);
            stream_error(shared, stream_id, Reason::STREAM_CLOSED).await
        }
        DataOutcome::RecentlyClosed => {
            // Still flow controlled: hand the credit straight back.
            release_connection_credit(shared, flow_len);
            Ok(())
        }
        DataOutcome::Unknown => {
            release_connection_credit(shared, flow_len);
            stream_error(shared, stream_id, Reason::STREAM_CLOSED).await
        }
    }
}

fn release_connection_credit(shared: &Arc<Shared>, n: usize) {
    if shared.conn_recv_window.release(n) {
        flush_connection_credit(shared);
    }
}

/// Try to emit an immediate connection WINDOW_UPDATE; if the queue is full
/// the credit stays pending for the ticker.
pub(crate) fn flush_connection_credit(shared: &Arc<Shared>) {
    if let Ok(permit) = shared.write_tx.try_reserve() {
        if let Some(increment) = shared.conn_recv_window.take_update() {
            permit.send(WriteMessage::Frame(
                WindowUpdate::new(StreamId::ZERO, increment).into(),
            ));
        }
    }
}

/// A stream-scoped protocol violation: reset the stream, leave the
/// connection alone.
async fn stream_error(shared: &Arc<Shared>, stream_id: StreamId, reason: Reason) -> Result<(), Error> {
    {
        let mut registry = shared.registry.lock().unwrap();
        if let Some(entry) = registry.get(stream_id) {
            let _ = entry.mailbox.try_send(StreamEvent::Reset(reason));
            registry.reset(stream_id);
        }
    }
    shared
        .enqueue(WriteMessage::Frame(RstStream::new(stream_id, reason).into()))
        .await
}

async fn recv_reset(shared: &Arc<Shared>, rst: RstStream) -> Result<(), Error> {
    let mailbox = {
        let mut registry = shared.registry.lock().unwrap();
        let mailbox = registry.get(rst.stream_id()).map(|e| e.mailbox.clone());
        registry.reset(rst.stream_id());
        mailbox
    };
    if let Some(mailbox) = mailbox {
        debug!(stream = rst.stream_id().as_u32(), reason = %rst.reason(), "stream reset by peer");
        let _ = mailbox.send(StreamEvent::Reset(rst.reason())).await;
    }
    Ok(())
}

async fn recv_window_update(shared: &Arc<Shared>, update: WindowUpdate) -> Result<(), Error> {
    if update.stream_id().is_zero() {
        if update.increment() == 0 {
            proto_err!(conn: "connection WINDOW_UPDATE with zero increment");
            return Err(Error::Protocol(Reason::PROTOCOL_ERROR));
        }
        return shared.conn_send_window.release(update.increment());
    }

    if update.increment() == 0 {
        proto_err!(stream: "WINDOW_UPDATE with zero increment on {:?}", update.stream_id());
        return stream_error(shared, update.stream_id(), Reason::PROTOCOL_ERROR).await;
    }

    let result = {
        let mut registry = shared.registry.lock().unwrap();
        match registry.get(update.stream_id()) {
            Some(entry) => Some(entry.send_window.release(update.increment())),
            None => None,
        }
    };
    match result {
        // Stream-level overflow resets the stream, not the connection.
        Some(Err(_)) => stream_error(shared, update.stream_id(), Reason::FLOW_CONTROL_ERROR).await,
        _ => Ok(()),
    }
}

async fn recv_ping(shared: &Arc<Shared>, ping: Ping) -> Result<(), Error> {
    let outcome = shared.ping_pong.lock().unwrap().handle(ping);
    match outcome {
        ReceivedPing::MustAck => {
            shared
                .enqueue(WriteMessage::Frame(Ping::pong(ping.into_payload()).into()))
                .await
        }
        ReceivedPing::Ok | ReceivedPing::Unknown => Ok(()),
    }
}

async fn recv_settings<R>(
    shared: &Arc<Shared>,
    reader: &mut FrameReader<R>,
    decoder: &mut Decoder,
    settings: Settings,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    if settings.is_ack() {
        // Our oldest outstanding SETTINGS is now in effect on both sides.
        let (table_size, max_frame, initial_window) = {
            let mut sync = shared.settings_sync.lock().unwrap();
            let committed = sync.recv_ack()?;
            (
                committed
                    .header_table_size()
                    .unwrap_or(frame::DEFAULT_HEADER_TABLE_SIZE),
                committed
                    .max_frame_size()
                    .unwrap_or(frame::DEFAULT_MAX_FRAME_SIZE),
                committed
                    .initial_window_size()
                    .unwrap_or(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            )
        };
        decoder.set_max_size(table_size as usize);
        reader.set_max_frame_size(max_frame);
        shared
            .registry
            .lock()
            .unwrap()
            .retarget_recv_windows(initial_window);
        return Ok(());
    }

    trace!(?settings, "settings received");

    // Apply before any later frame is processed, then acknowledge.
    let old_initial = shared
        .remote_settings
        .read()
        .unwrap()
        .initial_window_size()
        .unwrap_or(frame::DEFAULT_INITIAL_WINDOW_SIZE);
    if let Some(new_initial) = settings.initial_window_size() {
        let delta = new_initial as i64 - old_initial as i64;
        if delta != 0 {
            shared.registry.lock().unwrap().adjust_send_windows(delta)?;
        }
    }
    if let Some(max) = settings.max_concurrent_streams() {
        shared
            .registry
            .lock()
            .unwrap()
            .set_max_send_streams(max as usize);
    }
    shared.remote_settings.write().unwrap().merge(&settings);

    if settings.header_table_size().is_some() || settings.max_frame_size().is_some() {
        shared
            .enqueue(WriteMessage::ApplyEncoder {
                header_table_size: settings.header_table_size(),
                max_frame_size: settings.max_frame_size(),
            })
            .await?;
    }

    shared
        .enqueue(WriteMessage::Frame(Settings::ack().into()))
        .await
}

async fn recv_go_away(shared: &Arc<Shared>, go_away: GoAway) -> Result<(), Error> {
    let remote = RemoteGoAway {
        last_stream_id: go_away.last_stream_id(),
        reason: go_away.reason(),
        debug_data: go_away.debug_data().clone(),
    };
    debug!(last = remote.last_stream_id.as_u32(), reason = %remote.reason, "GOAWAY received");

    let refused = shared
        .registry
        .lock()
        .unwrap()
        .apply_go_away(remote.clone());
    for mailbox in refused {
        let _ = mailbox.send(StreamEvent::Reset(Reason::REFUSED_STREAM)).await;
    }

    shared.go_away_seen.send_replace(Some(remote));
    Ok(())
}

// ===== tickers =====

/// Periodically flush accumulated receive credit as WINDOW_UPDATE frames
/// and reap the recently-closed grace list.
pub(crate) async fn flow_ticker(shared: Arc<Shared>) {
    let mut interval = time::interval(shared.config.flow_update_interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut poison_rx = shared.poison.subscribe();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = poison_rx.changed() => break,
        }

        if let Some(increment) = shared.conn_recv_window.take_update() {
            if shared
                .write_tx
                .send(WriteMessage::Frame(
                    WindowUpdate::new(StreamId::ZERO, increment).into(),
                ))
                .await
                .is_err()
            {
                break;
            }
        }

        let updates = {
            let mut registry = shared.registry.lock().unwrap();
            registry.reap_closed(Instant::now());
            registry.take_window_updates()
        };
        for (stream_id, increment) in updates {
            if shared
                .write_tx
                .send(WriteMessage::Frame(
                    WindowUpdate::new(stream_id, increment).into(),
                ))
                .await
                .is_err()
            {
                return;
            }
        }
    }
    trace!("flow ticker done");
}

/// Send a keepalive PING every interval; a missing ACK within the timeout
/// fails the connection.
pub(crate) async fn ping_scheduler(shared: Arc<Shared>, interval: Duration, timeout: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // The first tick is immediate; skip it so the first ping waits a full
    // interval after the handshake.
    ticker.tick().await;
    let mut poison_rx = shared.poison.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = poison_rx.changed() => break,
        }

        let (payload, reply) = {
            let mut ping_pong = shared.ping_pong.lock().unwrap();
            let payload = ping_pong.next_payload();
            (payload, ping_pong.register(payload))
        };
        if shared
            .write_tx
            .send(WriteMessage::Frame(Ping::new(payload).into()))
            .await
            .is_err()
        {
            break;
        }

        match time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => {
                trace!(rtt = ?reply.rtt(), "keepalive pong");
            }
            // Connection torn down while waiting.
            Ok(Err(_)) => break,
            Err(_) => {
                warn!("keepalive ping timed out");
                fail_connection(&shared, Error::PingTimeout).await;
                break;
            }
        }
    }
    trace!("ping scheduler done");
}
