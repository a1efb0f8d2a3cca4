//! Boundary to the agents that execute forwarded commands.
//!
//! An [`AgentHost`] stands for whatever currently hosts a target's protocol
//! agent (a renderer process, a worker thread, a remote link). Attaching a
//! session yields an [`AgentConnection`]; the connection is replaced wholesale
//! when the host changes, and the session stays the source of truth for
//! in-flight calls.
//!
//! Agents answer through an [`AgentSink`], which marshals every message onto
//! the router queue tagged with the connection generation it belongs to.

use std::collections::{BTreeMap, HashMap};

use dt_protocol::CallId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::router::RouterEvent;
use crate::session::SessionKey;

/// Transport path used for a forwarded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentChannel {
	#[default]
	Default,
	/// Priority path that does not queue behind bulk traffic.
	Io,
}

/// A command handed to the agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentCommand<'a> {
	pub channel: AgentChannel,
	pub call_id: CallId,
	pub method: &'a str,
	/// Binary-encoded command.
	pub payload: &'a [u8],
}

/// Changed session-state entries reported by an agent.
///
/// `None` erases the entry.
pub type StateUpdate = HashMap<String, Option<String>>;

/// Per-session state blob handed to every newly attached agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(BTreeMap<String, String>);

impl SessionState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn apply(&mut self, update: &StateUpdate) {
		for (key, value) in update {
			match value {
				Some(value) => {
					self.0.insert(key.clone(), value.clone());
				}
				None => {
					self.0.remove(key);
				}
			}
		}
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}
}

/// A message produced by an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
	Response {
		call_id: CallId,
		payload: Vec<u8>,
		state: Option<StateUpdate>,
	},
	Notification {
		payload: Vec<u8>,
		state: Option<StateUpdate>,
	},
}

/// Callback half of an agent connection.
///
/// Cheap to clone and safe to use from any thread. Messages sent after the
/// connection was replaced or the session disposed are discarded by the
/// router.
#[derive(Debug, Clone)]
pub struct AgentSink {
	session: SessionKey,
	generation: u64,
	events: mpsc::UnboundedSender<RouterEvent>,
}

impl AgentSink {
	pub(crate) fn new(
		session: SessionKey,
		generation: u64,
		events: mpsc::UnboundedSender<RouterEvent>,
	) -> Self {
		Self {
			session,
			generation,
			events,
		}
	}

	pub fn session(&self) -> SessionKey {
		self.session
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Delivers the response to a forwarded call. Returns false once the
	/// router has shut down.
	pub fn respond(&self, call_id: CallId, payload: Vec<u8>, state: Option<StateUpdate>) -> bool {
		self.post(AgentMessage::Response {
			call_id,
			payload,
			state,
		})
	}

	/// Delivers an unsolicited notification.
	pub fn notify(&self, payload: Vec<u8>, state: Option<StateUpdate>) -> bool {
		self.post(AgentMessage::Notification { payload, state })
	}

	pub fn post(&self, message: AgentMessage) -> bool {
		self.events
			.send(RouterEvent::Agent {
				session: self.session,
				generation: self.generation,
				message,
			})
			.is_ok()
	}
}

/// Everything an agent needs to serve a session.
#[derive(Debug, Clone)]
pub struct AttachRequest {
	/// Protocol session id; empty for a root session.
	pub session_id: String,
	pub target_id: String,
	/// Snapshot of the state accumulated from previous agents.
	pub state: SessionState,
	/// Every command of this session travels on the IO channel.
	pub use_io_channel: bool,
	pub sink: AgentSink,
}

/// Live channel from a session to an agent.
pub trait AgentConnection: Send {
	fn send(&mut self, command: AgentCommand<'_>) -> Result<()>;

	/// Called once when the session lets go of the connection.
	fn detach(&mut self);
}

/// Source of agent connections for a target.
pub trait AgentHost: Send + Sync {
	fn attach(&self, request: AttachRequest) -> Result<Box<dyn AgentConnection>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_state_update_upserts_and_erases() {
		let mut state = SessionState::new();
		state.apply(&StateUpdate::from([
			("page.enabled".to_string(), Some("true".to_string())),
			("network.enabled".to_string(), Some("true".to_string())),
		]));
		state.apply(&StateUpdate::from([
			("network.enabled".to_string(), None),
			("page.enabled".to_string(), Some("false".to_string())),
			("missing".to_string(), None),
		]));
		assert_eq!(state.get("page.enabled"), Some("false"));
		assert_eq!(state.get("network.enabled"), None);
		assert_eq!(state.len(), 1);
	}

	#[test]
	fn test_empty_update_leaves_state() {
		let mut state = SessionState::new();
		state.apply(&StateUpdate::from([("a".to_string(), Some("1".to_string()))]));
		state.apply(&StateUpdate::new());
		assert_eq!(state.iter().collect::<Vec<_>>(), vec![("a", "1")]);
	}
}
