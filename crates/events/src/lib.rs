//! Change events and the messages pushed to realtime clients.
//!
//! Pure data + codec; no I/O lives here.

pub mod change;
pub mod message;
pub mod wire;

pub use change::{ChangeEvent, DecodeError, Operation};
pub use message::{BroadcastMessage, ControlFrame, StreamFrame};
pub use wire::{EVENT_STREAM_CONTENT_TYPE, EncodeError, encode_frame, encode_message};
