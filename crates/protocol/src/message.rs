//! Protocol message envelopes.
//!
//! Client-facing messages are JSON objects:
//!
//! - commands carry `id` and `method` (and optionally `params`)
//! - responses carry the command's `id` plus either `result` or `error`
//! - notifications carry `method` and `params` but no `id`
//!
//! Any of them may carry `sessionId` to address a child session. The router
//! works on [`serde_json::Value`] so params pass through untouched; the typed
//! structs here build outbound messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HeaderError;

/// Client-assigned integer correlating a command with its response.
pub type CallId = i64;

/// Key under which the child-session routing tag travels.
pub const SESSION_ID_KEY: &str = "sessionId";

/// Error message clients match verbatim when a target goes away mid-call.
pub const TARGET_CLOSED_MESSAGE: &str = "Inspected target navigated or closed";

/// Error message for calls lost to an agent crash.
pub const TARGET_CRASHED_MESSAGE: &str = "Target crashed";

/// JSON-RPC style error codes used by the protocol.
pub struct ErrorCode;

impl ErrorCode {
	pub const INVALID_REQUEST: i32 = -32600;
	pub const METHOD_NOT_FOUND: i32 = -32601;
	pub const INVALID_PARAMS: i32 = -32602;
	pub const INTERNAL_ERROR: i32 = -32603;
	pub const SERVER_ERROR: i32 = -32000;
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
	pub code: i32,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

impl ProtocolError {
	pub fn new(code: i32, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	/// Method is neither handled locally nor forwardable.
	pub fn method_not_found(method: &str) -> Self {
		Self::new(ErrorCode::METHOD_NOT_FOUND, format!("'{method}' wasn't found"))
	}

	/// Synthesized for calls abandoned by navigation, detach, or target teardown.
	pub fn target_closed() -> Self {
		Self::new(ErrorCode::SERVER_ERROR, TARGET_CLOSED_MESSAGE)
	}

	pub fn target_crashed() -> Self {
		Self::new(ErrorCode::SERVER_ERROR, TARGET_CRASHED_MESSAGE)
	}

	pub fn invalid_request(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::INVALID_REQUEST, message)
	}

	pub fn invalid_params(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::INVALID_PARAMS, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::INTERNAL_ERROR, message)
	}

	pub fn server_error(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::SERVER_ERROR, message)
	}
}

impl std::fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} ({})", self.message, self.code)
	}
}

impl From<HeaderError> for ProtocolError {
	fn from(err: HeaderError) -> Self {
		ProtocolError::invalid_request(err.to_string())
	}
}

/// Response to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub id: CallId,
	/// Success result (mutually exclusive with error)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ProtocolError>,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl Response {
	pub fn success(id: CallId, result: Value) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
			session_id: None,
		}
	}

	pub fn failure(id: CallId, error: ProtocolError) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
			session_id: None,
		}
	}

	pub fn from_result(id: CallId, result: Result<Value, ProtocolError>) -> Self {
		match result {
			Ok(value) => Self::success(id, value),
			Err(error) => Self::failure(id, error),
		}
	}

	pub fn into_value(self) -> Value {
		// Serializing plain data into a Value cannot fail.
		serde_json::to_value(self).unwrap_or(Value::Null)
	}
}

/// Unsolicited event pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl Notification {
	pub fn new(method: impl Into<String>, params: Value) -> Self {
		Self {
			method: method.into(),
			params,
			session_id: None,
		}
	}

	pub fn into_value(self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}
}

/// Call id and method of an inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHeader {
	pub id: CallId,
	pub method: String,
}

impl CommandHeader {
	/// Extracts the header, validating the envelope shape.
	///
	/// Messages without an id fail with [`HeaderError::MissingId`] and cannot
	/// be answered. Other failures carry the id so an error can be returned.
	pub fn parse(message: &Value) -> Result<Self, HeaderError> {
		let object = message.as_object().ok_or(HeaderError::NotAnObject)?;
		let id = object
			.get("id")
			.and_then(Value::as_i64)
			.ok_or(HeaderError::MissingId)?;
		let method = object
			.get("method")
			.and_then(Value::as_str)
			.ok_or(HeaderError::MissingMethod { id })?;
		if let Some(params) = object.get("params") {
			if !params.is_object() {
				return Err(HeaderError::ParamsNotObject { id });
			}
		}
		Ok(Self {
			id,
			method: method.to_string(),
		})
	}

}

/// Returns the non-empty `sessionId` tag of a message.
pub fn session_id(message: &Value) -> Option<&str> {
	message
		.get(SESSION_ID_KEY)
		.and_then(Value::as_str)
		.filter(|id| !id.is_empty())
}

/// Tags a message with `sessionId`, appending the key if it is new.
pub fn set_session_id(message: &mut Value, id: &str) {
	if let Some(object) = message.as_object_mut() {
		object.insert(SESSION_ID_KEY.to_string(), Value::String(id.to_string()));
	}
}

/// Returns the `params` object of a message, or an empty map.
pub fn params(message: &Value) -> Map<String, Value> {
	message
		.get("params")
		.and_then(Value::as_object)
		.cloned()
		.unwrap_or_default()
}
