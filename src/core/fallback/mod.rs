//! WebSocket fallback channel.
//!
//! Used when no RTC engine is available: audio travels as binary frames and
//! control messages as JSON text frames over a single websocket, after a
//! bounded hello handshake.

pub mod messages;
mod websocket;

pub use messages::{
    ClientHello, FallbackMessageError, ServerHello, ServerMessage, WEBSOCKET_TRANSPORT,
    parse_server_message,
};
pub use websocket::{SEND_QUEUE_CAPACITY, WebSocketChannel};
