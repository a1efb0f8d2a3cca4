//! Agent side of the WebSocket bridge.
//!
//! One agent socket serves one target. Every session attached to the target
//! gets its own connection number on the link, so the agent can tell sessions
//! apart and responses for a replaced connection are dropped here instead of
//! reaching the router.
//!
//! Frames are JSON text tagged by `type`. Command payloads travel as base64 of
//! the binary encoding; agents may answer with either base64 binary or a plain
//! JSON object.


use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use base64::prelude::*;
use dt_runtime::{
	AgentChannel, AgentCommand, AgentConnection, AgentHost, AgentSink, AttachRequest, SessionState,
	StateUpdate,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Frames sent to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToAgent {
	Attach {
		connection: u64,
		#[serde(rename = "sessionId")]
		session_id: String,
		#[serde(rename = "targetId")]
		target_id: String,
		state: SessionState,
		io: bool,
	},
	Detach {
		connection: u64,
	},
	Command {
		connection: u64,
		#[serde(rename = "callId")]
		call_id: i64,
		method: String,
		channel: AgentChannel,
		payload: String,
	},
}

/// Frames received from an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromAgent {
	Response {
		connection: u64,
		#[serde(rename = "callId")]
		call_id: i64,
		payload: Value,
		#[serde(default)]
		state: Option<StateUpdate>,
	},
	Notification {
		connection: u64,
		payload: Value,
		#[serde(default)]
		state: Option<StateUpdate>,
	},
	/// The agent is about to be replaced by a navigation.
	Navigating,
	/// The navigation committed within the same agent.
	Committed,
	Crashed,
}

/// Target lifecycle change reported over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
	Navigating,
	Committed,
	Crashed,
}

struct LinkState {
	target_id: String,
	default_tx: mpsc::UnboundedSender<String>,
	io_tx: mpsc::UnboundedSender<String>,
	sinks: HashMap<u64, AgentSink>,
	next_connection: u64,
	closed: bool,
}

impl LinkState {
	fn queue(&self, channel: AgentChannel, frame: &ToAgent) -> Result<(), dt_runtime::Error> {
		let unavailable = || dt_runtime::Error::AgentUnavailable(self.target_id.clone());
		if self.closed {
			return Err(unavailable());
		}
		let text = serde_json::to_string(frame).map_err(|_| unavailable())?;
		let tx = match channel {
			AgentChannel::Default => &self.default_tx,
			AgentChannel::Io => &self.io_tx,
		};
		tx.send(text).map_err(|_| unavailable())
	}
}

/// Receiving half of an agent link's outbound queues.
pub struct AgentQueues {
	default_rx: mpsc::UnboundedReceiver<String>,
	io_rx: mpsc::UnboundedReceiver<String>,
}

impl AgentQueues {
	/// Next frame to write, preferring the IO queue.
	pub async fn next(&mut self) -> Option<String> {
		tokio::select! {
			biased;
			Some(frame) = self.io_rx.recv() => Some(frame),
			Some(frame) = self.default_rx.recv() => Some(frame),
			else => None,
		}
	}

	/// Non-blocking variant of [`next`](Self::next).
	pub fn try_next(&mut self) -> Option<String> {
		self.io_rx.try_recv().or_else(|_| self.default_rx.try_recv()).ok()
	}
}

/// Agent host backed by one agent WebSocket.
#[derive(Clone)]
pub struct WsAgentHost {
	shared: Arc<Mutex<LinkState>>,
}

impl WsAgentHost {
	pub fn new(target_id: impl Into<String>) -> (Self, AgentQueues) {
		let (default_tx, default_rx) = mpsc::unbounded_channel();
		let (io_tx, io_rx) = mpsc::unbounded_channel();
		let host = Self {
			shared: Arc::new(Mutex::new(LinkState {
				target_id: target_id.into(),
				default_tx,
				io_tx,
				sinks: HashMap::new(),
				next_connection: 1,
				closed: false,
			})),
		};
		(host, AgentQueues { default_rx, io_rx })
	}

	pub fn connections(&self) -> usize {
		self.shared.lock().sinks.len()
	}

	pub fn is_closed(&self) -> bool {
		self.shared.lock().closed
	}

	/// Stops accepting attaches and sends; pending connections are forgotten.
	pub fn close(&self) {
		let mut state = self.shared.lock();
		state.closed = true;
		state.sinks.clear();
	}

	/// Applies one text frame from the agent.
	pub fn handle_frame(&self, raw: &str) -> Result<Option<LinkEvent>> {
		let frame: FromAgent = serde_json::from_str(raw).context("Parsing agent frame")?;
		let (connection, call_id, payload, state) = match frame {
			FromAgent::Response {
				connection,
				call_id,
				payload,
				state,
			} => (connection, Some(call_id), payload, state),
			FromAgent::Notification {
				connection,
				payload,
				state,
			} => (connection, None, payload, state),
			FromAgent::Navigating => return Ok(Some(LinkEvent::Navigating)),
			FromAgent::Committed => return Ok(Some(LinkEvent::Committed)),
			FromAgent::Crashed => return Ok(Some(LinkEvent::Crashed)),
		};

		let Some(sink) = self.shared.lock().sinks.get(&connection).cloned() else {
			debug!(target = "dtmux", connection, "dropping frame for detached connection");
			return Ok(None);
		};
		let payload = decode_payload(payload)?;
		let delivered = match call_id {
			Some(call_id) => sink.respond(call_id, payload, state),
			None => sink.notify(payload, state),
		};
		if !delivered {
			return Err(anyhow!("router is no longer running"));
		}
		Ok(None)
	}
}

impl AgentHost for WsAgentHost {
	fn attach(&self, request: AttachRequest) -> dt_runtime::Result<Box<dyn AgentConnection>> {
		let mut state = self.shared.lock();
		let connection = state.next_connection;
		state.queue(
			AgentChannel::Default,
			&ToAgent::Attach {
				connection,
				session_id: request.session_id,
				target_id: request.target_id,
				state: request.state,
				io: request.use_io_channel,
			},
		)?;
		state.next_connection += 1;
		state.sinks.insert(connection, request.sink);
		Ok(Box::new(WsAgentConnection {
			connection,
			shared: Arc::clone(&self.shared),
		}))
	}
}

struct WsAgentConnection {
	connection: u64,
	shared: Arc<Mutex<LinkState>>,
}

impl AgentConnection for WsAgentConnection {
	fn send(&mut self, command: AgentCommand<'_>) -> dt_runtime::Result<()> {
		let state = self.shared.lock();
		if !state.sinks.contains_key(&self.connection) {
			return Err(dt_runtime::Error::AgentUnavailable(state.target_id.clone()));
		}
		state.queue(
			command.channel,
			&ToAgent::Command {
				connection: self.connection,
				call_id: command.call_id,
				method: command.method.to_string(),
				channel: command.channel,
				payload: BASE64_STANDARD.encode(command.payload),
			},
		)
	}

	fn detach(&mut self) {
		let mut state = self.shared.lock();
		if state.sinks.remove(&self.connection).is_some() {
			let _ = state.queue(
				AgentChannel::Default,
				&ToAgent::Detach {
					connection: self.connection,
				},
			);
		}
	}
}

fn decode_payload(payload: Value) -> Result<Vec<u8>> {
	match payload {
		Value::String(encoded) => BASE64_STANDARD
			.decode(encoded.as_bytes())
			.context("Invalid base64 payload"),
		Value::Object(_) => Ok(serde_json::to_vec(&payload)?),
		other => Err(anyhow!("payload must be a base64 string or an object, got {other}")),
	}
}
