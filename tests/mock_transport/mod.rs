//! Recording mock Transport
//!
//! Stands in for the vendor RTC engine. Every call is recorded, return codes
//! are configurable, and events are raised through the sink handed to `create`
//! the way engine threads would.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use rtc_audio_channel::{
    AudioCodec, EventSink, MessageReliability, RoomOptions, Transport, TransportCode,
    TransportEvent,
};

/// One `send_message` call.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub room_id: String,
    pub dest_user_id: String,
    pub data: Vec<u8>,
    pub reliability: MessageReliability,
}

pub struct MockTransport {
    sinks: Mutex<Vec<EventSink>>,
    calls: Mutex<Vec<String>>,
    pub sent_messages: Mutex<Vec<SentMessage>>,
    pub sent_audio: Mutex<Vec<(Vec<u8>, AudioCodec)>>,
    pub join_options: Mutex<Option<RoomOptions>>,
    pub params: Mutex<Vec<String>>,
    pub create_code: AtomicI32,
    pub init_code: AtomicI32,
    pub join_code: AtomicI32,
    pub fini_code: AtomicI32,
    pub send_audio_code: AtomicI32,
    pub send_message_code: AtomicI32,
    /// Raise join success from inside `join_room`
    pub auto_join: AtomicBool,
    /// Raise finalize-complete from inside `fini`
    pub auto_finalize: AtomicBool,
    pub destroyed: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            sent_messages: Mutex::new(Vec::new()),
            sent_audio: Mutex::new(Vec::new()),
            join_options: Mutex::new(None),
            params: Mutex::new(Vec::new()),
            create_code: AtomicI32::new(0),
            init_code: AtomicI32::new(0),
            join_code: AtomicI32::new(0),
            fini_code: AtomicI32::new(0),
            send_audio_code: AtomicI32::new(0),
            send_message_code: AtomicI32::new(0),
            auto_join: AtomicBool::new(true),
            auto_finalize: AtomicBool::new(true),
            destroyed: AtomicUsize::new(0),
        }
    }
}

impl MockTransport {
    /// Mock that never acknowledges the join on its own.
    pub fn silent() -> Self {
        let transport = Self::default();
        transport.auto_join.store(false, Ordering::SeqCst);
        transport
    }

    /// Raise an event from the most recently created engine.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let sink = self.sinks.lock().last().cloned();
        sink.map(|s| s.emit(event)).unwrap_or(false)
    }

    /// Raise an event from the engine created `index`-th (0-based).
    pub fn emit_from(&self, index: usize, event: TransportEvent) -> bool {
        let sink = self.sinks.lock().get(index).cloned();
        sink.map(|s| s.emit(event)).unwrap_or(false)
    }

    pub fn engines_created(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == name).count()
    }

    fn record(&self, name: &str) {
        self.calls.lock().push(name.to_string());
    }
}

impl Transport for MockTransport {
    fn create(&self, _app_id: &str, sink: EventSink) -> TransportCode {
        self.record("create");
        let code = self.create_code.load(Ordering::SeqCst);
        if code == 0 {
            self.sinks.lock().push(sink);
        }
        code
    }

    fn init(&self) -> TransportCode {
        self.record("init");
        self.init_code.load(Ordering::SeqCst)
    }

    fn set_params(&self, params: &str) -> TransportCode {
        self.record("set_params");
        self.params.lock().push(params.to_string());
        0
    }

    fn set_audio_codec(&self, _codec: AudioCodec) -> TransportCode {
        self.record("set_audio_codec");
        0
    }

    fn join_room(
        &self,
        room_id: &str,
        _user_id: &str,
        _token: &str,
        options: RoomOptions,
    ) -> TransportCode {
        self.record("join_room");
        *self.join_options.lock() = Some(options);
        let code = self.join_code.load(Ordering::SeqCst);
        if code == 0 && self.auto_join.load(Ordering::SeqCst) {
            self.emit(TransportEvent::JoinRoomSuccess {
                room: room_id.to_string(),
                elapsed_ms: 12,
            });
        }
        code
    }

    fn leave_room(&self, _room_id: &str) -> TransportCode {
        self.record("leave_room");
        0
    }

    fn fini(&self) -> TransportCode {
        self.record("fini");
        let code = self.fini_code.load(Ordering::SeqCst);
        if code == 0 && self.auto_finalize.load(Ordering::SeqCst) {
            self.emit(TransportEvent::FinalizeComplete);
        }
        code
    }

    fn destroy(&self) {
        self.record("destroy");
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn send_audio(&self, _room_id: &str, data: &[u8], codec: AudioCodec) -> TransportCode {
        self.record("send_audio");
        let code = self.send_audio_code.load(Ordering::SeqCst);
        if code == 0 {
            self.sent_audio.lock().push((data.to_vec(), codec));
        }
        code
    }

    fn send_message(
        &self,
        room_id: &str,
        dest_user_id: &str,
        data: &[u8],
        reliability: MessageReliability,
    ) -> TransportCode {
        self.record("send_message");
        self.sent_messages.lock().push(SentMessage {
            room_id: room_id.to_string(),
            dest_user_id: dest_user_id.to_string(),
            data: data.to_vec(),
            reliability,
        });
        self.send_message_code.load(Ordering::SeqCst)
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

/// Let the event pump drain whatever is queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Frame `payload` with `tag` and its real length.
pub fn envelope(tag: &[u8; 4], payload: &str) -> Vec<u8> {
    let mut raw = tag.to_vec();
    raw.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    raw.extend_from_slice(payload.as_bytes());
    raw
}
