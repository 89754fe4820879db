use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

use crate::client::{Client, Connection};
use crate::codec::{FrameReader, FrameWriter};
use crate::error::Error;
use crate::frame::{self, Settings, StreamId, WindowUpdate};
use crate::preface;
use crate::proto::dispatcher::{self, Config, FallbackSink, Shared, WriteMessage};
use crate::proto::ping_pong::PingPong;
use crate::proto::registry::Registry;
use crate::proto::settings::SettingsHandler;
use crate::proto::window::{RecvWindow, SendWindow};
use crate::proto::{DEFAULT_RESET_STREAM_MAX, DEFAULT_RESET_STREAM_SECS, DEFAULT_WINDOW_SIZE};

const DEFAULT_WRITE_QUEUE_DEPTH: usize = 64;
const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Configures and establishes client connections.
pub struct Builder {
    /// connection level flow control window size.
    initial_connection_window_size: Option<u32>,

    /// Time to keep locally reset streams around before reaping.
    reset_stream_duration: Duration,

    /// Maximum number of locally reset streams to keep at a time.
    reset_stream_max: usize,

    /// Initial `Settings` frame to send as part of the handshake.
    settings: Settings,

    /// Keepalive ping interval; `None` disables the ping scheduler.
    ping_interval: Option<Duration>,

    /// How long to wait for a PING ACK.
    ping_timeout: Duration,

    /// How often accumulated receive credit is flushed as WINDOW_UPDATE.
    flow_update_interval: Duration,

    /// Bound on the writer queue.
    write_queue_depth: usize,

    /// Bound on each stream's event mailbox.
    mailbox_capacity: usize,

    /// Receives frames nothing else handles (unknown types, PRIORITY).
    fallback: Option<FallbackSink>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            initial_connection_window_size: None,
            reset_stream_duration: Duration::from_secs(DEFAULT_RESET_STREAM_SECS),
            reset_stream_max: DEFAULT_RESET_STREAM_MAX,
            settings: Settings::default(),
            ping_interval: None,
            ping_timeout: Duration::from_secs(10),
            flow_update_interval: Duration::from_millis(1000),
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            fallback: None,
        }
    }

    // ===== Flow Control =====

    // connection level
    pub fn initial_connection_window_size(&mut self, size: u32) -> &mut Self {
        self.initial_connection_window_size = Some(size);
        self
    }

    // stream level
    pub fn initial_window_size(&mut self, size: u32) -> &mut Self {
        self.settings.set_initial_window_size(Some(size));
        self
    }

    // ====== Settings frame =====

    /// Indicates the size (in octets) of the largest HTTP/2 frame payload that
    /// the configured client is able to accept.
    ///
    /// The sender may send data frames that are **smaller** than this value,
    /// but any data larger than `max` will be broken up into multiple `DATA`
    /// frames.
    ///
    /// The value **must** be between 16,384 and 16,777,215. The default value
    /// is 16,384.
    pub fn max_frame_size(&mut self, max: u32) -> &mut Self {
        self.settings.set_max_frame_size(Some(max));
        self
    }

    /// Sets the max size of received header blocks.
    ///
    /// This advisory setting informs a peer of the maximum size of header list
    /// that the sender is prepared to accept, in octets. The value is based on
    /// the uncompressed size of header fields, including the length of the name
    /// and value in octets plus an overhead of 32 octets for each header field.
    ///
    /// This setting is also used to limit the maximum amount of data that is
    /// buffered to decode HEADERS frames.
    pub fn max_header_list_size(&mut self, max: u32) -> &mut Self {
        self.settings.set_max_header_list_size(Some(max));
        self
    }

    /// Sets the maximum number of concurrent streams the **peer** may open
    /// (server pushes, for a client connection).
    pub fn max_concurrent_streams(&mut self, max: u32) -> &mut Self {
        self.settings.set_max_concurrent_streams(Some(max));
        self
    }

    /// Sets the header table size.
    ///
    /// This setting informs the peer of the maximum size of the header
    /// compression table used to encode header blocks, in octets. The encoder
    /// may select any value equal to or less than the header table size
    /// specified by the sender.
    ///
    /// The default value is 4,096.
    pub fn header_table_size(&mut self, size: u32) -> &mut Self {
        self.settings.set_header_table_size(Some(size));
        self
    }

    /// Whether the server may push responses (RFC 7540 §8.2). Enabled by
    /// default; promised streams are refused unless
    /// [`Client::push_promises`] has been claimed.
    pub fn enable_push(&mut self, enabled: bool) -> &mut Self {
        self.settings.set_enable_push(enabled);
        self
    }

    // ===== Reset bookkeeping =====

    /// Sets the maximum number of closed streams remembered for the grace
    /// window during which late frames are ignored rather than treated as
    /// STREAM_CLOSED.
    ///
    /// The default value is currently 50.
    pub fn max_concurrent_reset_streams(&mut self, max: usize) -> &mut Self {
        self.reset_stream_max = max;
        self
    }

    /// Sets the duration closed streams stay in the grace window.
    ///
    /// The default value is currently 1 second.
    pub fn reset_stream_duration(&mut self, dur: Duration) -> &mut Self {
        self.reset_stream_duration = dur;
        self
    }

    // ===== Liveness =====

    /// Send a keepalive PING every `interval`; zero disables the scheduler.
    /// A missing ACK within the ping timeout fails the connection.
    pub fn ping_interval(&mut self, interval: Duration) -> &mut Self {
        self.ping_interval = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    /// How long to wait for any PING ACK. The default is 10 seconds.
    pub fn ping_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.ping_timeout = timeout;
        self
    }

    /// How often accumulated receive credit is flushed as WINDOW_UPDATE
    /// frames. The default is 1 second.
    pub fn flow_update_interval(&mut self, interval: Duration) -> &mut Self {
        self.flow_update_interval = interval;
        self
    }

    /// Depth of the bounded outbound frame queue.
    pub fn write_queue_depth(&mut self, depth: usize) -> &mut Self {
        self.write_queue_depth = depth.max(1);
        self
    }

    /// Capacity of each stream's event mailbox.
    pub fn mailbox_capacity(&mut self, capacity: usize) -> &mut Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Install a sink for frames nothing else handles: unknown frame types
    /// and PRIORITY. The default drops them.
    pub fn on_unhandled_frame(
        &mut self,
        sink: impl Fn(crate::frame::Frame) + Send + Sync + 'static,
    ) -> &mut Self {
        self.fallback = Some(Box::new(sink));
        self
    }

    /// Perform the client connection preface on `io` and spawn the
    /// connection tasks. The preface bytes and our initial SETTINGS frame
    /// are written synchronously, before any other outbound frame.
    pub async fn handshake<T>(&mut self, io: T) -> Result<(Client, Connection), Error>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let reader = FrameReader::new(read_half, frame::DEFAULT_MAX_FRAME_SIZE);
        let mut writer = FrameWriter::new(write_half);

        let settings = self.settings.clone();
        preface::send_client_preface(&mut writer, &settings).await?;

        let config = Config {
            local_settings: settings.clone(),
            initial_connection_window_size: self.initial_connection_window_size,
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            flow_update_interval: self.flow_update_interval,
            write_queue_depth: self.write_queue_depth,
            mailbox_capacity: self.mailbox_capacity,
        };

        let (write_tx, write_rx) = mpsc::channel::<WriteMessage>(config.write_queue_depth);
        let (poison_tx, poison_rx) = watch::channel(None);
        let (go_away_tx, _) = watch::channel(None);

        let conn_recv_window = RecvWindow::new(DEFAULT_WINDOW_SIZE);
        // Advertise any extra connection-level window right behind the
        // handshake frames.
        if let Some(target) = config.initial_connection_window_size {
            if target > DEFAULT_WINDOW_SIZE {
                let delta = target - DEFAULT_WINDOW_SIZE;
                writer
                    .write_frame(&WindowUpdate::new(StreamId::ZERO, delta).into())
                    .await?;
                conn_recv_window.grow(delta);
            }
        }

        let shared = std::sync::Arc::new(Shared {
            write_tx,
            registry: std::sync::Mutex::new(Registry::new(
                usize::MAX,
                self.reset_stream_max,
                self.reset_stream_duration,
            )),
            conn_send_window: SendWindow::new(DEFAULT_WINDOW_SIZE),
            conn_recv_window,
            remote_settings: std::sync::RwLock::new(Settings::default()),
            settings_sync: std::sync::Mutex::new(SettingsHandler::new(settings)),
            ping_pong: std::sync::Mutex::new(PingPong::new()),
            poison: poison_tx,
            go_away_seen: go_away_tx,
            push_tx: std::sync::Mutex::new(None),
            fallback: self.fallback.take(),
            config,
        });

        let mut tasks = Vec::with_capacity(4);
        tasks.push(tokio::spawn(dispatcher::writer_loop(
            writer,
            write_rx,
            shared.clone(),
        )));
        tasks.push(tokio::spawn(dispatcher::reader_loop(reader, shared.clone())));
        tasks.push(tokio::spawn(dispatcher::flow_ticker(shared.clone())));
        if let Some(interval) = shared.config.ping_interval {
            tasks.push(tokio::spawn(dispatcher::ping_scheduler(
                shared.clone(),
                interval,
                shared.config.ping_timeout,
            )));
        }

        Ok((Client::new(shared), Connection::new(poison_rx, tasks)))
    }
}
