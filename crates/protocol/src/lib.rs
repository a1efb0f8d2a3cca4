//! Wire types for the DevTools session router.
//!
//! This crate holds everything that describes a protocol message on the wire,
//! independent of how sessions are routed:
//!
//! - **Messages**: command/response/notification envelopes, call ids, the
//!   `sessionId` routing tag, and the structured protocol error codes
//! - **Codec**: lossless conversion between JSON text and the compact binary
//!   form, plus the per-client [`WireFormat`] strategy
//!
//! # Main Types
//!
//! - [`WireFormat`] - Encoding negotiated once per client connection
//! - [`CommandHeader`] - Call id and method extracted from an inbound command
//! - [`ProtocolError`] - Error object attached to a failed response
//! - [`Response`], [`Notification`] - Outbound message builders

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{WireFormat, decode_value, encode_value, is_binary, to_binary, to_structured};
pub use error::{CodecError, HeaderError};
pub use message::{
	CallId, CommandHeader, ErrorCode, Notification, ProtocolError, Response,
	SESSION_ID_KEY, TARGET_CLOSED_MESSAGE, TARGET_CRASHED_MESSAGE, session_id, set_session_id,
};
