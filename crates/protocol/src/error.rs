//! Error types for wire decoding.

use thiserror::Error;

use crate::message::CallId;

/// Failure to convert a message between JSON and binary form.
///
/// Offsets point at the first byte of the item that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
	#[error("unexpected end of input at offset {0}")]
	UnexpectedEof(usize),

	#[error("binary message does not start with an envelope")]
	MissingEnvelope,

	#[error("envelope declares {declared} bytes but its value spans {actual}")]
	EnvelopeLength { declared: usize, actual: usize },

	#[error("unsupported initial byte 0x{initial:02x} at offset {offset}")]
	Unsupported { initial: u8, offset: usize },

	#[error("map key at offset {0} is not a text string")]
	NonStringKey(usize),

	#[error("invalid UTF-8 in text string at offset {0}")]
	InvalidUtf8(usize),

	#[error("integer at offset {0} does not fit in 64 bits")]
	IntegerOverflow(usize),

	#[error("non-finite float at offset {0}")]
	NonFiniteFloat(usize),

	#[error("nesting deeper than {0} levels")]
	TooDeep(usize),

	#[error("{0} trailing bytes after message")]
	TrailingBytes(usize),

	#[error("message of {0} bytes exceeds the envelope size limit")]
	TooLarge(usize),

	#[error("top-level message must be an object")]
	NotAnObject,

	#[error("invalid JSON: {0}")]
	Json(String),
}

impl From<serde_json::Error> for CodecError {
	fn from(err: serde_json::Error) -> Self {
		CodecError::Json(err.to_string())
	}
}

/// Reasons an inbound command cannot be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
	#[error("message is not an object")]
	NotAnObject,

	/// No usable call id: nothing can be answered.
	#[error("message must have integer 'id' property")]
	MissingId,

	#[error("message must have string 'method' property")]
	MissingMethod { id: CallId },

	#[error("message has property 'params' but it is not an object")]
	ParamsNotObject { id: CallId },
}

impl HeaderError {
	/// Call id to attach an error response to, if the message carried one.
	pub fn call_id(&self) -> Option<CallId> {
		match self {
			HeaderError::MissingMethod { id } | HeaderError::ParamsNotObject { id } => Some(*id),
			HeaderError::NotAnObject | HeaderError::MissingId => None,
		}
	}
}
