//! Error types for the session router.
//!
//! These are caller errors: misuse of the embedding API such as registering a
//! method twice or attaching a child to a child. Failures caused by clients or
//! agents never surface here; they become dropped messages or protocol error
//! responses.

use dt_protocol::CallId;
use thiserror::Error;

use crate::client::ClientId;
use crate::session::SessionKey;

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// A call with this id is already awaiting a response.
	#[error("call id {0} is already pending")]
	DuplicateCallId(CallId),

	/// Two domain handlers claim the same method.
	#[error("method '{method}' is already handled by '{handler}'")]
	DuplicateMethod { method: String, handler: String },

	/// A child session with this id is already registered.
	#[error("session '{0}' already exists")]
	DuplicateSession(String),

	/// Only root sessions may own children.
	#[error("session {0} is not a root session and cannot own children")]
	NotRootSession(SessionKey),

	#[error("session {0} not found")]
	SessionNotFound(SessionKey),

	/// No child session is registered under this protocol id.
	#[error("no child session '{0}'")]
	ChildNotFound(String),

	#[error("target '{0}' not found")]
	TargetNotFound(String),

	#[error("target '{0}' is already registered")]
	DuplicateTarget(String),

	#[error("client {0} not connected")]
	ClientNotFound(ClientId),

	/// The agent host refused or lost the connection.
	#[error("agent unavailable: {0}")]
	AgentUnavailable(String),

	/// Operation attempted on a disposed session.
	#[error("session {0} is disposed")]
	Disposed(SessionKey),

	/// The router task has stopped.
	#[error("router is shut down")]
	RouterClosed,
}
