//! In-memory test doubles for driving the router without real agents or
//! sockets.
//!
//! - [`RecordingAgentHost`]: hands out connections that record every command
//!   and answer through the captured [`AgentSink`]
//! - [`ClientOutput`]: receiving end of a [`ClientLink`], decoding frames back
//!   into messages
//!
//! # Example
//!
//! ```ignore
//! let host = RecordingAgentHost::new();
//! let (mut router, mut events) = Router::new(RouterConfig::default());
//! router.register_target(TargetInfo::new("page-1", TargetKind::Page), Some(host.shared()))?;
//! let (link, mut output) = client_link(WireFormat::Json);
//! let client = router.connect_client("page-1", link)?;
//! ```

use std::sync::Arc;

use dt_protocol::{CallId, Notification, Response, WireFormat, decode_value, encode_value};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::{
	AgentChannel, AgentCommand, AgentConnection, AgentHost, AgentSink, AttachRequest, SessionState,
	StateUpdate,
};
use crate::client::ClientLink;
use crate::error::{Error, Result};
use crate::router::{Router, RouterEvent};

/// A command as received by a [`RecordingAgentHost`] connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
	pub session_id: String,
	pub generation: u64,
	pub channel: AgentChannel,
	pub call_id: CallId,
	pub method: String,
	/// Decoded payload.
	pub message: Value,
}

#[derive(Debug, Clone)]
pub struct AttachRecord {
	pub session_id: String,
	pub target_id: String,
	pub state: SessionState,
	pub use_io_channel: bool,
	pub sink: AgentSink,
}

#[derive(Debug, Default)]
struct Recording {
	sent: Vec<SentCommand>,
	attaches: Vec<AttachRecord>,
	detaches: usize,
	refuse_attach: bool,
	fail_sends: bool,
}

/// Agent host that records traffic instead of executing it.
///
/// Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingAgentHost {
	inner: Arc<Mutex<Recording>>,
}

impl RecordingAgentHost {
	pub fn new() -> Self {
		Self::default()
	}

	/// The host as a trait object for target registration.
	pub fn shared(&self) -> Arc<dyn AgentHost> {
		Arc::new(self.clone())
	}

	pub fn sent(&self) -> Vec<SentCommand> {
		self.inner.lock().sent.clone()
	}

	pub fn sent_ids(&self) -> Vec<CallId> {
		self.inner.lock().sent.iter().map(|c| c.call_id).collect()
	}

	pub fn take_sent(&self) -> Vec<SentCommand> {
		std::mem::take(&mut self.inner.lock().sent)
	}

	pub fn attaches(&self) -> Vec<AttachRecord> {
		self.inner.lock().attaches.clone()
	}

	pub fn detaches(&self) -> usize {
		self.inner.lock().detaches
	}

	pub fn refuse_attach(&self, refuse: bool) {
		self.inner.lock().refuse_attach = refuse;
	}

	pub fn fail_sends(&self, fail: bool) {
		self.inner.lock().fail_sends = fail;
	}

	/// Sink of the most recent connection made for `session_id`.
	pub fn sink(&self, session_id: &str) -> Option<AgentSink> {
		self.inner
			.lock()
			.attaches
			.iter()
			.rev()
			.find(|record| record.session_id == session_id)
			.map(|record| record.sink.clone())
	}

	/// Answers a call through the latest connection of `session_id`.
	pub fn respond(&self, session_id: &str, call_id: CallId, result: Value) -> bool {
		self.respond_with_state(session_id, call_id, result, None)
	}

	pub fn respond_with_state(
		&self,
		session_id: &str,
		call_id: CallId,
		result: Value,
		state: Option<StateUpdate>,
	) -> bool {
		let Some(sink) = self.sink(session_id) else {
			return false;
		};
		match encode_value(&Response::success(call_id, result).into_value()) {
			Ok(payload) => sink.respond(call_id, payload, state),
			Err(_) => false,
		}
	}

	pub fn notify(&self, session_id: &str, method: &str, params: Value) -> bool {
		let Some(sink) = self.sink(session_id) else {
			return false;
		};
		match encode_value(&Notification::new(method, params).into_value()) {
			Ok(payload) => sink.notify(payload, None),
			Err(_) => false,
		}
	}
}

impl AgentHost for RecordingAgentHost {
	fn attach(&self, request: AttachRequest) -> Result<Box<dyn AgentConnection>> {
		let mut inner = self.inner.lock();
		if inner.refuse_attach {
			return Err(Error::AgentUnavailable("attach refused".to_string()));
		}
		let connection = RecordingConnection {
			session_id: request.session_id.clone(),
			generation: request.sink.generation(),
			inner: Arc::clone(&self.inner),
		};
		inner.attaches.push(AttachRecord {
			session_id: request.session_id,
			target_id: request.target_id,
			state: request.state,
			use_io_channel: request.use_io_channel,
			sink: request.sink,
		});
		Ok(Box::new(connection))
	}
}

struct RecordingConnection {
	session_id: String,
	generation: u64,
	inner: Arc<Mutex<Recording>>,
}

impl AgentConnection for RecordingConnection {
	fn send(&mut self, command: AgentCommand<'_>) -> Result<()> {
		let mut inner = self.inner.lock();
		if inner.fail_sends {
			return Err(Error::AgentUnavailable("send refused".to_string()));
		}
		let message = decode_value(command.payload)?;
		inner.sent.push(SentCommand {
			session_id: self.session_id.clone(),
			generation: self.generation,
			channel: command.channel,
			call_id: command.call_id,
			method: command.method.to_string(),
			message,
		});
		Ok(())
	}

	fn detach(&mut self) {
		self.inner.lock().detaches += 1;
	}
}

/// Receiving end of a client link.
#[derive(Debug)]
pub struct ClientOutput {
	format: WireFormat,
	rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Creates a client link and the output it feeds.
pub fn client_link(format: WireFormat) -> (ClientLink, ClientOutput) {
	let (link, rx) = ClientLink::channel(format);
	(link, ClientOutput { format, rx })
}

impl ClientOutput {
	/// Raw frames received so far.
	pub fn frames(&mut self) -> Vec<Vec<u8>> {
		let mut frames = Vec::new();
		while let Ok(frame) = self.rx.try_recv() {
			frames.push(frame);
		}
		frames
	}

	/// Messages received so far, decoded with the link's format.
	pub fn messages(&mut self) -> Vec<Value> {
		let format = self.format;
		self.frames()
			.iter()
			.filter_map(|frame| format.decode(frame).ok())
			.collect()
	}
}

/// Processes queued events until the queue is empty.
pub fn pump(router: &mut Router, events: &mut mpsc::UnboundedReceiver<RouterEvent>) -> usize {
	let mut processed = 0;
	while let Ok(event) = events.try_recv() {
		router.process(event);
		processed += 1;
	}
	processed
}
