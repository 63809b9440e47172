//! RTC channel facade.
//!
//! Drives the session state machine against a [`Transport`] and routes the
//! in-band signaling it carries.
//!
//! # Event flow
//!
//! ```text
//! engine thread --EventSink--> mpsc --> event pump task --> state machine
//!                                                      \--> Application callbacks
//! ```
//!
//! Engine callbacks only enqueue. All state transitions triggered by the
//! engine, all teardown that follows an asynchronous failure, and every
//! Application callback run on the pump task, so the Application may call
//! [`AudioChannel::close_channel`] from inside any callback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{
    AudioChannel, AudioFrame, CallbackSlots, ChannelError, ChannelErrorCallback,
    ChannelNotifyCallback, ChannelResult, IncomingAudioCallback, IncomingSignalCallback,
    ReceivedAudio,
};
use super::session::{SessionPhase, SessionState, SessionStateMachine, Teardown};
use crate::config::ChannelConfig;
use crate::core::signaling::{
    Dispatcher, FunctionCallRequest, FunctionHandler, FunctionRegistry, FunctionReply,
    SignalEvent,
};
use crate::core::transport::{
    EventSink, MessageReliability, RoomOptions, SessionHandle, Transport, TransportEvent, codes,
};

/// How long a dropped channel keeps waiting for finalize-complete.
const SHUTDOWN_FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

/// Work item for the event pump.
#[derive(Debug)]
pub(crate) enum PumpEvent {
    /// Engine callback, tagged with the engine that raised it
    Transport {
        session: SessionHandle,
        event: TransportEvent,
    },
    /// Join acknowledgement deadline for an engine
    JoinDeadline(SessionHandle),
    /// Deliver the closed notification owed by an explicit close
    NotifyClosed,
}

struct RtcInner {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionStateMachine>,
    callbacks: CallbackSlots,
    functions: FunctionRegistry,
    dispatcher: Dispatcher,
    events_tx: mpsc::UnboundedSender<PumpEvent>,
}

/// Audio channel over an RTC room.
///
/// # Example
///
/// ```rust,ignore
/// let channel = RtcChannel::new(ChannelConfig::from_env()?, transport)?;
/// channel.register_function("get_current_weather", Arc::new(|call| Box::pin(async move {
///     "sunny".to_string()
/// })));
/// channel.on_channel_opened(Arc::new(|| Box::pin(async { println!("joined") })));
/// channel.open_channel().await?;
/// ```
pub struct RtcChannel {
    inner: Arc<RtcInner>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PumpEvent>>>,
    cancel: CancellationToken,
}

impl RtcChannel {
    /// Create a channel. Fails with `ConfigInvalid` if the configuration is incomplete.
    pub fn new(config: ChannelConfig, transport: Arc<dyn Transport>) -> ChannelResult<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            config.signaling.length_check,
            config.signaling.max_envelope_bytes,
        );

        Ok(Self {
            inner: Arc::new(RtcInner {
                config,
                transport,
                state: Mutex::new(SessionStateMachine::new()),
                callbacks: CallbackSlots::default(),
                functions: FunctionRegistry::new(),
                dispatcher,
                events_tx,
            }),
            events_rx: Mutex::new(Some(events_rx)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Snapshot of the session state.
    pub fn state(&self) -> SessionState {
        self.inner.state.lock().snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase()
    }

    /// Peer that function replies are currently addressed to.
    pub fn remote_peer(&self) -> Option<String> {
        self.inner.state.lock().remote_peer()
    }

    /// Answer function calls named `name` automatically.
    pub fn register_function(&self, name: impl Into<String>, handler: FunctionHandler) {
        self.inner.functions.register(name, handler);
    }

    /// Send a `func` reply for `call_id` to the current remote peer.
    ///
    /// Fails with `NotConnected` when the session is not joined or no peer is
    /// known; the reply is dropped, never queued.
    pub fn submit_function_result(
        &self,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> ChannelResult<()> {
        self.inner
            .send_reply(&FunctionReply::new(call_id, content))
    }

    fn ensure_pump(&self) {
        let rx = self.events_rx.lock().take();
        if let Some(rx) = rx {
            let inner = self.inner.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                inner.run_pump(rx, cancel).await;
            });
        }
    }
}

impl RtcInner {
    async fn run_pump(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<PumpEvent>,
        cancel: CancellationToken,
    ) {
        debug!("Event pump started for room {}", self.config.session.room_id);
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => self.handle_pump_event(event).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    self.drain_pump(&mut rx).await;
                    break;
                }
            }
        }
        debug!("Event pump stopped for room {}", self.config.session.room_id);
    }

    /// Deliver what is already queued, then keep running until the engine
    /// has finalized and been destroyed.
    async fn drain_pump(self: &Arc<Self>, rx: &mut mpsc::UnboundedReceiver<PumpEvent>) {
        while let Ok(event) = rx.try_recv() {
            self.handle_pump_event(event).await;
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_FINALIZE_TIMEOUT;
        while self.state.lock().holds_engine() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => self.handle_pump_event(event).await,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Engine for room {} did not finalize within {}ms of shutdown",
                        self.config.session.room_id,
                        SHUTDOWN_FINALIZE_TIMEOUT.as_millis()
                    );
                    break;
                }
            }
        }
    }

    async fn handle_pump_event(self: &Arc<Self>, event: PumpEvent) {
        match event {
            PumpEvent::Transport { session, event } => {
                self.handle_transport_event(session, event).await;
            }
            PumpEvent::JoinDeadline(session) => {
                let Some(timeout) = self.config.join_timeout else {
                    return;
                };
                let error = ChannelError::HandshakeTimeout(timeout);
                let teardown = self.state.lock().expire_join(session, error.clone());
                if let Some(teardown) = teardown {
                    warn!("Join not acknowledged within {}ms", timeout.as_millis());
                    self.finish_failure(teardown, error).await;
                }
            }
            PumpEvent::NotifyClosed => {
                info!("Channel closed");
                self.callbacks.emit_closed().await;
            }
        }
    }

    async fn handle_transport_event(self: &Arc<Self>, session: SessionHandle, event: TransportEvent) {
        if let TransportEvent::FinalizeComplete = event {
            let destroyable = self.state.lock().finalized(session);
            if destroyable {
                self.transport.destroy();
                info!("Engine {} finalized and destroyed", session);
            } else {
                debug!("Ignoring finalize-complete from {}", session);
            }
            return;
        }

        let current = self.state.lock().is_current(session);
        if !current {
            debug!("Ignoring {} from stale {}", event.kind(), session);
            return;
        }

        match event {
            TransportEvent::JoinRoomSuccess { room, elapsed_ms } => {
                let first = self.state.lock().join_succeeded(session);
                if first {
                    info!("Joined room {} in {}ms", room, elapsed_ms);
                    self.callbacks.emit_opened().await;
                } else {
                    debug!("Duplicate join success for room {}", room);
                }
            }
            TransportEvent::RejoinRoomSuccess { room, elapsed_ms } => {
                info!("Rejoined room {} in {}ms", room, elapsed_ms);
            }
            TransportEvent::UserJoined { room, user_id } => {
                let recorded = self.state.lock().remote_joined(session, &user_id);
                if recorded {
                    info!("Remote user {} joined room {}", user_id, room);
                } else {
                    debug!("Ignoring user {} joined before the session was joined", user_id);
                }
            }
            TransportEvent::UserOffline {
                room,
                user_id,
                reason,
            } => {
                let cleared = self.state.lock().remote_offline(session, &user_id);
                info!(
                    "Remote user {} left room {} (reason {}){}",
                    user_id,
                    room,
                    reason,
                    if cleared { "; no remote peer" } else { "" }
                );
            }
            TransportEvent::UserMuteAudio {
                user_id, muted, ..
            } => {
                debug!("Remote user {} audio muted: {}", user_id, muted);
            }
            TransportEvent::UserMuteVideo {
                user_id, muted, ..
            } => {
                debug!("Remote user {} video muted: {}", user_id, muted);
            }
            TransportEvent::ConnectionLost { room } => {
                self.fail(session, ChannelError::ConnectionLost(room)).await;
            }
            TransportEvent::RoomError {
                room,
                code,
                message,
            } => {
                error!("Room {} error {}: {}", room, code, message);
                self.fail(
                    session,
                    ChannelError::JoinFailed(format!("room error {code}: {message}")),
                )
                .await;
            }
            TransportEvent::GlobalError { code, message } => {
                error!("Engine error {}: {}", code, message);
                self.fail(session, ChannelError::Transport { code, message })
                    .await;
            }
            TransportEvent::AudioData {
                user_id,
                sent_ts,
                codec,
                data,
                ..
            } => {
                self.deliver_audio(ReceivedAudio {
                    data,
                    codec,
                    user_id,
                    sent_ts,
                })
                .await;
            }
            TransportEvent::VideoData {
                user_id,
                is_key_frame,
                len,
                ..
            } => {
                debug!(
                    "Ignoring {} byte video frame from {} (key frame: {})",
                    len, user_id, is_key_frame
                );
            }
            TransportEvent::KeyFrameRequest { user_id, .. } => {
                debug!("Key frame requested by {}", user_id);
            }
            TransportEvent::MessageReceived {
                user_id,
                data,
                binary,
                ..
            } => {
                self.handle_message(&user_id, data, binary).await;
            }
            TransportEvent::TargetBitrateChanged { target_bps, .. } => {
                debug!("Target bitrate changed to {} bps", target_bps);
            }
            TransportEvent::MessageSendResult {
                message_id,
                error,
                extra,
                ..
            } => {
                if error != 0 {
                    warn!("Message {} failed with {}: {}", message_id, error, extra);
                } else {
                    debug!("Message {} delivered", message_id);
                }
            }
            TransportEvent::TokenWillExpire { room } => {
                warn!("Token for room {} is about to expire", room);
            }
            TransportEvent::LicenseExpireWarning { days_left } => {
                warn!("Engine license expires in {} days", days_left);
            }
            TransportEvent::FinalizeComplete => {}
        }
    }

    async fn deliver_audio(&self, audio: ReceivedAudio) {
        if !self.config.capabilities.subscribe_audio {
            return;
        }
        let joined = self.state.lock().phase() == SessionPhase::Joined;
        if !joined {
            debug!("Dropping {} bytes of audio outside the joined phase", audio.data.len());
            return;
        }
        self.callbacks.emit_audio(audio).await;
    }

    async fn handle_message(self: &Arc<Self>, user_id: &str, data: Bytes, binary: bool) {
        // Dispatch errors are logged by the dispatcher.
        let Ok(events) = self.dispatcher.decode(&data, binary) else {
            return;
        };
        debug!("Received {} signaling event(s) from {}", events.len(), user_id);

        for event in events {
            let call = match &event {
                SignalEvent::FunctionCall(request) => Some(request.clone()),
                _ => None,
            };

            self.callbacks.emit_signal(event).await;

            if let Some(request) = call {
                if self.functions.contains(&request.function_name) {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move {
                        inner.answer_function_call(request).await;
                    });
                } else {
                    debug!(
                        "No handler registered for function '{}'",
                        request.function_name
                    );
                }
            }
        }
    }

    async fn answer_function_call(&self, request: FunctionCallRequest) {
        let Some(reply) = self.functions.invoke(&request).await else {
            return;
        };
        // Failures are logged by send_reply.
        let _ = self.send_reply(&reply);
    }

    fn send_reply(&self, reply: &FunctionReply) -> ChannelResult<()> {
        let (phase, peer) = {
            let state = self.state.lock();
            (state.phase(), state.remote_peer())
        };

        let dest = match (phase, peer) {
            (SessionPhase::Joined, Some(peer)) => peer,
            (SessionPhase::Joined, None) => {
                warn!(
                    "Dropping function reply for call {}: no remote peer",
                    reply.tool_call_id
                );
                return Err(ChannelError::NotConnected);
            }
            (phase, _) => {
                warn!(
                    "Dropping function reply for call {}: session is {}",
                    reply.tool_call_id, phase
                );
                return Err(ChannelError::NotConnected);
            }
        };

        let frame = reply.encode()?;
        let code = self.transport.send_message(
            &self.config.session.room_id,
            &dest,
            &frame,
            MessageReliability::Reliable,
        );
        codes::send_message_result(code).inspect_err(|e| {
            warn!("Function reply for call {} not sent: {}", reply.tool_call_id, e);
        })?;

        debug!("Sent function reply for call {} to {}", reply.tool_call_id, dest);
        Ok(())
    }

    async fn fail(&self, session: SessionHandle, error: ChannelError) {
        let teardown = self.state.lock().fail(session, error.clone());
        if let Some(teardown) = teardown {
            self.finish_failure(teardown, error).await;
        }
    }

    async fn finish_failure(&self, teardown: Teardown, error: ChannelError) {
        error!("Session failed: {}", error);
        if let Some(handle) = teardown.handle {
            self.teardown_engine(handle);
        }
        if teardown.notify_closed {
            self.callbacks.emit_closed().await;
        }
        self.callbacks.emit_error(error).await;
    }

    /// Leave and finalize. `destroy` waits for finalize-complete unless `fini`
    /// was refused, in which case no completion will follow.
    fn teardown_engine(&self, handle: SessionHandle) {
        codes::log_leave_result(self.transport.leave_room(&self.config.session.room_id));
        self.state.lock().finalize_engine(handle);
        if !codes::log_fini_result(self.transport.fini()) {
            self.transport.destroy();
            self.state.lock().release_engine(handle);
        }
    }

    fn abandon_open(&self, handle: SessionHandle, error: &ChannelError) {
        self.state.lock().open_failed(handle, error.clone());
    }
}

#[async_trait]
impl AudioChannel for RtcChannel {
    async fn open_channel(&self) -> ChannelResult<()> {
        self.ensure_pump();

        let handle = self.inner.state.lock().begin_open()?;
        let inner = &self.inner;
        let config = &inner.config;
        info!(
            "Opening channel: room {} as {} ({})",
            config.session.room_id, config.session.user_id, handle
        );

        let sink = EventSink::new(handle, inner.events_tx.clone());
        if let Err(e) = codes::create_result(inner.transport.create(&config.session.app_id, sink)) {
            error!("Engine creation failed: {}", e);
            inner.abandon_open(handle, &e);
            return Err(e);
        }

        if let Err(e) = codes::init_result(inner.transport.init()) {
            error!("Engine init failed: {}", e);
            inner.transport.destroy();
            inner.abandon_open(handle, &e);
            return Err(e);
        }

        for params in &config.engine_params {
            let code = inner.transport.set_params(params);
            if code != 0 {
                warn!("Engine rejected parameters {} ({})", params, code);
            }
        }

        let code = inner.transport.set_audio_codec(config.audio_codec);
        if code != 0 {
            warn!("Engine rejected audio codec {} ({})", config.audio_codec, code);
        }

        let options = RoomOptions {
            auto_subscribe_audio: config.capabilities.subscribe_audio,
            auto_subscribe_video: config.capabilities.subscribe_video,
        };
        let code = inner.transport.join_room(
            &config.session.room_id,
            &config.session.user_id,
            &config.session.token,
            options,
        );
        if let Err(e) = codes::join_result(code) {
            error!("Join room {} failed: {}", config.session.room_id, e);
            inner.state.lock().finalize_engine(handle);
            if !codes::log_fini_result(inner.transport.fini()) {
                inner.transport.destroy();
                inner.state.lock().release_engine(handle);
            }
            inner.abandon_open(handle, &e);
            return Err(e);
        }

        if let Some(timeout) = config.join_timeout {
            let tx = inner.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(PumpEvent::JoinDeadline(handle));
            });
        }

        debug!("Join request accepted for room {}", config.session.room_id);
        Ok(())
    }

    async fn close_channel(&self) {
        let teardown = self.inner.state.lock().request_close();
        let Some(teardown) = teardown else {
            debug!("close_channel: no active session");
            return;
        };

        info!("Closing channel for room {}", self.inner.config.session.room_id);
        if let Some(handle) = teardown.handle {
            self.inner.teardown_engine(handle);
        }
        self.inner.state.lock().close_completed();

        if teardown.notify_closed && self.inner.events_tx.send(PumpEvent::NotifyClosed).is_err() {
            warn!("Event pump is gone; closed notification not delivered");
        }
    }

    async fn send_audio(&self, frame: AudioFrame<'_>) -> ChannelResult<()> {
        self.inner.state.lock().ensure_joined()?;

        if !self.inner.config.capabilities.local_capture_source {
            return Err(ChannelError::SendFailed(
                "local capture source is disabled".to_string(),
            ));
        }

        let code = self.inner.transport.send_audio(
            &self.inner.config.session.room_id,
            frame.data,
            frame.codec,
        );
        codes::send_audio_result(code).inspect_err(|e| {
            debug!("Dropped {} byte audio frame: {}", frame.data.len(), e);
        })
    }

    fn is_open(&self) -> bool {
        self.inner.state.lock().is_open()
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

impl Drop for RtcChannel {
    fn drop(&mut self) {
        let teardown = self.inner.state.lock().request_close();
        if let Some(teardown) = teardown {
            warn!(
                "RtcChannel dropped with an active session; leaving room {}",
                self.inner.config.session.room_id
            );
            if let Some(handle) = teardown.handle {
                self.inner.teardown_engine(handle);
            }
            self.inner.state.lock().close_completed();
            if teardown.notify_closed {
                let _ = self.inner.events_tx.send(PumpEvent::NotifyClosed);
            }
        }
        self.cancel.cancel();
    }
}
