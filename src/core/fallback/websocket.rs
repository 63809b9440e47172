use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{ClientHello, ServerMessage, parse_server_message};
use crate::config::FallbackConfig;
use crate::core::channel::{
    AudioChannel, AudioCodec, AudioFrame, CallbackSlots, ChannelError, ChannelErrorCallback,
    ChannelNotifyCallback, ChannelResult, IncomingAudioCallback, IncomingSignalCallback,
    ReceivedAudio,
};
use crate::core::signaling::SignalEvent;

/// Outbound frames buffered ahead of the socket writer.
pub const SEND_QUEUE_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Flags owned by one socket. A reopen gets a fresh set, so a socket that is
/// still shutting down never touches the state of its successor.
struct LinkState {
    connected: AtomicBool,
    hello_received: AtomicBool,
    error_occurred: AtomicBool,
    closed_notified: AtomicBool,
    last_incoming: Mutex<Instant>,
}

impl LinkState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            hello_received: AtomicBool::new(false),
            error_occurred: AtomicBool::new(false),
            closed_notified: AtomicBool::new(false),
            last_incoming: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_incoming.lock() = Instant::now();
    }

    fn is_open(&self, idle_timeout: Duration) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.hello_received.load(Ordering::SeqCst)
            && !self.error_occurred.load(Ordering::SeqCst)
            && self.last_incoming.lock().elapsed() <= idle_timeout
    }
}

struct Connection {
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    link: Arc<LinkState>,
    _task: JoinHandle<()>,
}

struct WsInner {
    config: FallbackConfig,
    callbacks: CallbackSlots,
    connection: Mutex<Option<Connection>>,
    server_sample_rate: AtomicU32,
}

/// Audio channel over a plain websocket.
///
/// Binary frames carry Opus audio in both directions; JSON text frames carry
/// control messages, delivered as [`SignalEvent::Message`].
pub struct WebSocketChannel {
    inner: Arc<WsInner>,
}

impl WebSocketChannel {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            inner: Arc::new(WsInner {
                config,
                callbacks: CallbackSlots::default(),
                connection: Mutex::new(None),
                server_sample_rate: AtomicU32::new(0),
            }),
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.inner.config
    }

    /// Sample rate announced in the server hello.
    pub fn server_sample_rate(&self) -> Option<u32> {
        match self.inner.server_sample_rate.load(Ordering::SeqCst) {
            0 => None,
            rate => Some(rate),
        }
    }

    /// Queue a JSON control message.
    pub fn send_text(&self, text: &str) -> ChannelResult<()> {
        if !self.is_open() {
            return Err(ChannelError::NotConnected);
        }
        self.inner.enqueue(Message::Text(text.to_string().into()))
    }

    fn build_request(
        &self,
    ) -> ChannelResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let config = &self.inner.config;
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::ConfigInvalid(format!("invalid fallback url: {e}")))?;

        let header = |value: String| {
            HeaderValue::from_str(&value)
                .map_err(|e| ChannelError::ConfigInvalid(format!("invalid header value: {e}")))
        };

        let headers = request.headers_mut();
        if let Some(token) = &config.token {
            headers.insert("Authorization", header(format!("Bearer {token}"))?);
        }
        headers.insert(
            "Protocol-Version",
            header(config.protocol_version.to_string())?,
        );
        headers.insert("Device-Id", header(config.device_id.clone())?);
        headers.insert("Client-Id", header(config.client_id.clone())?);

        Ok(request)
    }

    fn fail_open(&self, error: ChannelError) -> ChannelError {
        let connection = self.inner.connection.lock().take();
        if let Some(connection) = connection {
            connection.link.error_occurred.store(true, Ordering::SeqCst);
            connection.link.connected.store(false, Ordering::SeqCst);
            connection.cancel.cancel();
        }
        error
    }
}

impl WsInner {
    fn enqueue(&self, message: Message) -> ChannelResult<()> {
        let tx = self.connection.lock().as_ref().map(|c| c.tx.clone());
        let Some(tx) = tx else {
            return Err(ChannelError::NotConnected);
        };
        tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ChannelError::SendFailed("send queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => ChannelError::NotConnected,
        })
    }

    async fn run_connection(
        self: Arc<Self>,
        ws: WsStream,
        link: Arc<LinkState>,
        mut rx: mpsc::Receiver<Message>,
        cancel: CancellationToken,
        mut hello_tx: Option<oneshot::Sender<()>>,
    ) {
        let (mut ws_sink, mut ws_stream) = ws.split();
        let mut failure: Option<ChannelError> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = ws_sink.send(Message::Close(None)).await {
                        debug!("Failed to send close frame: {}", e);
                    }
                    break;
                }

                Some(message) = rx.recv() => {
                    if let Err(e) = ws_sink.send(message).await {
                        error!("Failed to send WebSocket message: {}", e);
                        failure = Some(ChannelError::ConnectionLost(e.to_string()));
                        break;
                    }
                }

                incoming = ws_stream.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(data))) => {
                            link.touch();
                            self.callbacks
                                .emit_audio(ReceivedAudio {
                                    data,
                                    codec: AudioCodec::Opus,
                                    user_id: String::new(),
                                    sent_ts: 0,
                                })
                                .await;
                        }
                        Some(Ok(Message::Text(text))) => {
                            link.touch();
                            self.handle_text(text.as_str(), &link, &mut hello_tx).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            link.touch();
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            failure = Some(ChannelError::ConnectionLost(e.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        link.connected.store(false, Ordering::SeqCst);
        if failure.is_some() {
            link.error_occurred.store(true, Ordering::SeqCst);
        }
        info!("Websocket disconnected");
        // Only sessions that completed the hello are reported as closed.
        let opened = link.hello_received.load(Ordering::SeqCst);
        if opened && !link.closed_notified.swap(true, Ordering::SeqCst) {
            self.callbacks.emit_closed().await;
            if let Some(error) = failure {
                self.callbacks.emit_error(error).await;
            }
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        link: &LinkState,
        hello_tx: &mut Option<oneshot::Sender<()>>,
    ) {
        match parse_server_message(text) {
            Ok(ServerMessage::Hello(hello)) => {
                let Some(tx) = hello_tx.take() else {
                    debug!("Ignoring repeated server hello");
                    return;
                };
                if let Some(rate) = hello.sample_rate() {
                    self.server_sample_rate.store(rate, Ordering::SeqCst);
                }
                link.hello_received.store(true, Ordering::SeqCst);
                if tx.send(()).is_err() {
                    link.hello_received.store(false, Ordering::SeqCst);
                    debug!("Server hello arrived after the handshake was abandoned");
                    return;
                }
                debug!(
                    "Server hello received (session {:?}, sample rate {:?})",
                    hello.session_id,
                    hello.sample_rate()
                );
                info!("Audio channel opened");
                // Frames behind the hello are read only after opened returns.
                self.callbacks.emit_opened().await;
            }
            Ok(ServerMessage::Control(value)) => {
                self.callbacks.emit_signal(SignalEvent::Message(value)).await;
            }
            Err(e) => error!("{}", e),
        }
    }
}

#[async_trait]
impl AudioChannel for WebSocketChannel {
    async fn open_channel(&self) -> ChannelResult<()> {
        let previous = self.inner.connection.lock().take();
        if let Some(previous) = previous {
            if previous.link.connected.load(Ordering::SeqCst) {
                *self.inner.connection.lock() = Some(previous);
                return Err(ChannelError::AlreadyJoined);
            }
            previous.cancel.cancel();
        }

        self.inner.server_sample_rate.store(0, Ordering::SeqCst);

        let request = self.build_request()?;
        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                error!("Failed to connect to websocket server: {}", e);
                self.fail_open(ChannelError::JoinFailed(format!(
                    "failed to connect to {}: {e}",
                    self.inner.config.url
                )))
            })?;
        info!("Connected to {}", self.inner.config.url);

        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (hello_tx, hello_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let link = Arc::new(LinkState::new());
        let task = tokio::spawn(self.inner.clone().run_connection(
            ws,
            link.clone(),
            rx,
            cancel.clone(),
            Some(hello_tx),
        ));
        *self.inner.connection.lock() = Some(Connection {
            tx,
            cancel,
            link,
            _task: task,
        });

        let hello = ClientHello::new(&self.inner.config)
            .to_json()
            .map_err(|e| self.fail_open(ChannelError::SendFailed(e.to_string())))?;
        self.inner
            .enqueue(Message::Text(hello.into()))
            .map_err(|e| self.fail_open(e))?;

        let timeout = self.inner.config.handshake_timeout;
        match tokio::time::timeout(timeout, hello_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(self.fail_open(ChannelError::JoinFailed(
                    "connection closed before server hello".to_string(),
                )));
            }
            Err(_) => {
                error!("Failed to receive server hello");
                return Err(self.fail_open(ChannelError::HandshakeTimeout(timeout)));
            }
        }

        Ok(())
    }

    async fn close_channel(&self) {
        let connection = self.inner.connection.lock().take();
        match connection {
            Some(connection) => {
                connection.link.connected.store(false, Ordering::SeqCst);
                connection.cancel.cancel();
                info!("Closing websocket channel");
            }
            None => debug!("close_channel: not connected"),
        }
    }

    async fn send_audio(&self, frame: AudioFrame<'_>) -> ChannelResult<()> {
        if !self.is_open() {
            return Err(ChannelError::NotConnected);
        }
        if frame.codec != AudioCodec::Opus {
            warn!("Fallback channel expects opus, sending {} as-is", frame.codec);
        }
        self.inner
            .enqueue(Message::Binary(Bytes::copy_from_slice(frame.data)))
    }

    fn is_open(&self) -> bool {
        self.inner
            .connection
            .lock()
            .as_ref()
            .is_some_and(|c| c.link.is_open(self.inner.config.idle_timeout))
    }

    fn on_incoming_audio(&self, callback: IncomingAudioCallback) {
        self.inner.callbacks.set_audio(callback);
    }

    fn on_incoming_signal(&self, callback: IncomingSignalCallback) {
        self.inner.callbacks.set_signal(callback);
    }

    fn on_channel_opened(&self, callback: ChannelNotifyCallback) {
        self.inner.callbacks.set_opened(callback);
    }

    fn on_channel_closed(&self, callback: ChannelNotifyCallback) {
        self.inner.callbacks.set_closed(callback);
    }

    fn on_channel_error(&self, callback: ChannelErrorCallback) {
        self.inner.callbacks.set_error(callback);
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        let connection = self.inner.connection.lock().take();
        if let Some(connection) = connection {
            connection.cancel.cancel();
        }
    }
}
