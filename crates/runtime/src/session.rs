//! Protocol sessions.
//!
//! A [`Session`] is one client's conversation with one target. It owns the
//! local domain handlers and the table of calls forwarded to the agent, and
//! holds at most one agent connection at a time. Sessions never own each
//! other: children are referenced by [`SessionKey`] and live in the router.
//!
//! # Phases
//!
//! - **Active**: local dispatch and forwarding both run
//! - **Suspended**: the agent is being replaced; forwarded calls queue up
//! - **Disposed**: terminal; nothing reaches the client any more


use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dt_protocol::message::params;
use dt_protocol::{
	CallId, CommandHeader, Notification, ProtocolError, Response, WireFormat, encode_value,
	set_session_id,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agent::{
	AgentChannel, AgentCommand, AgentConnection, AgentHost, AgentMessage, AgentSink, AttachRequest,
	SessionState, StateUpdate,
};
use crate::client::ClientLink;
use crate::dispatcher::DomainDispatcher;
use crate::error::{Error, Result};
use crate::handler::{DispatchOutcome, DomainHandler, MethodCall, Responder};
use crate::pending::PendingCallTable;
use crate::policy::MethodPolicy;
use crate::router::RouterEvent;

/// Router-assigned session handle. Never reused, so a stale key cannot reach
/// a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(pub(crate) u64);

impl fmt::Display for SessionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "session-{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Active,
	Suspended,
	Disposed,
}

/// Identity and flags of a new session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
	pub key: SessionKey,
	/// Protocol id; empty for the root session of a target.
	pub id: String,
	pub parent: Option<SessionKey>,
	pub target_id: String,
	/// Every method must be handled locally; nothing is forwarded.
	pub browser_only: bool,
	/// All traffic goes over the IO channel (worker targets).
	pub use_io_channel: bool,
}

pub struct Session {
	key: SessionKey,
	id: String,
	parent: Option<SessionKey>,
	target_id: String,
	client: ClientLink,
	dispatcher: DomainDispatcher,
	pending: PendingCallTable,
	children: HashMap<String, SessionKey>,
	agent: Option<Box<dyn AgentConnection>>,
	/// Bumped whenever the agent connection changes; messages tagged with an
	/// older value are discarded.
	generation: u64,
	phase: Phase,
	browser_only: bool,
	use_io_channel: bool,
	state: SessionState,
	auto_attach: bool,
	policy: Arc<MethodPolicy>,
	events: mpsc::UnboundedSender<RouterEvent>,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("key", &self.key)
			.field("id", &self.id)
			.field("target_id", &self.target_id)
			.field("phase", &self.phase)
			.field("pending", &self.pending.len())
			.field("children", &self.children.len())
			.field("has_agent", &self.agent.is_some())
			.finish()
	}
}

impl Session {
	pub fn new(
		spec: SessionSpec,
		client: ClientLink,
		policy: Arc<MethodPolicy>,
		events: mpsc::UnboundedSender<RouterEvent>,
	) -> Self {
		Self {
			key: spec.key,
			id: spec.id,
			parent: spec.parent,
			target_id: spec.target_id,
			client,
			dispatcher: DomainDispatcher::new(),
			pending: PendingCallTable::new(),
			children: HashMap::new(),
			agent: None,
			generation: 0,
			phase: Phase::Active,
			browser_only: spec.browser_only,
			use_io_channel: spec.use_io_channel,
			state: SessionState::new(),
			auto_attach: false,
			policy,
			events,
		}
	}

	pub fn key(&self) -> SessionKey {
		self.key
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn is_root(&self) -> bool {
		self.id.is_empty()
	}

	pub fn parent(&self) -> Option<SessionKey> {
		self.parent
	}

	pub fn target_id(&self) -> &str {
		&self.target_id
	}

	pub fn phase(&self) -> Phase {
		self.phase
	}

	pub fn is_browser_only(&self) -> bool {
		self.browser_only
	}

	pub fn uses_io_channel(&self) -> bool {
		self.use_io_channel
	}

	pub fn pending(&self) -> &PendingCallTable {
		&self.pending
	}

	pub fn state(&self) -> &SessionState {
		&self.state
	}

	pub fn client_link(&self) -> &ClientLink {
		&self.client
	}

	pub fn client_format(&self) -> WireFormat {
		self.client.format()
	}

	pub fn has_agent(&self) -> bool {
		self.agent.is_some()
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn auto_attach(&self) -> bool {
		self.auto_attach
	}

	pub fn set_auto_attach(&mut self, enabled: bool) {
		self.auto_attach = enabled;
	}

	pub fn register_handler(&mut self, handler: Box<dyn DomainHandler>) -> Result<()> {
		self.dispatcher.register(handler)
	}

	pub fn domains(&self) -> impl Iterator<Item = &str> {
		self.dispatcher.domains()
	}

	/// Handles a command addressed to this session.
	///
	/// The `sessionId` tag, if any, has already been used for routing and is
	/// ignored here.
	pub fn dispatch_command(&mut self, message: Value) {
		if self.phase == Phase::Disposed {
			debug!(session = %self.key, "command for disposed session dropped");
			return;
		}

		let header = match CommandHeader::parse(&message) {
			Ok(header) => header,
			Err(err) => {
				match err.call_id() {
					Some(call_id) => self.reply(call_id, Err(err.into())),
					None => debug!(session = %self.key, error = %err, "dropping malformed command"),
				}
				return;
			}
		};

		let handled_locally = self.dispatcher.can_dispatch_locally(&header.method);
		if handled_locally {
			let call = MethodCall {
				call_id: header.id,
				method: header.method.clone(),
				params: params(&message),
			};
			let responder = Responder::new(self.key, header.id, self.events.clone());
			match self.dispatcher.dispatch(call, responder) {
				Some(DispatchOutcome::Done(result)) => {
					self.reply(header.id, result);
					return;
				}
				Some(DispatchOutcome::Deferred) => return,
				Some(DispatchOutcome::FallThrough) | None => {}
			}
		}

		if self.browser_only {
			let error = if handled_locally {
				let method = &header.method;
				ProtocolError::server_error(format!("'{method}' cannot be forwarded from a browser target"))
			} else {
				ProtocolError::method_not_found(&header.method)
			};
			self.reply(header.id, Err(error));
			return;
		}

		self.forward(header, &message);
	}

	fn forward(&mut self, header: CommandHeader, message: &Value) {
		let payload = match encode_value(message) {
			Ok(payload) => payload,
			Err(err) => {
				warn!(session = %self.key, call_id = header.id, error = %err, "dropping unencodable command");
				return;
			}
		};
		if let Err(err) = self.pending.add(header.id, header.method, payload) {
			debug!(session = %self.key, call_id = header.id, "rejecting duplicate call id");
			self.reply(header.id, Err(ProtocolError::invalid_request(err.to_string())));
			return;
		}
		self.flush();
	}

	/// Transmits queued calls in order while the session is active.
	fn flush(&mut self) {
		if self.phase != Phase::Active {
			return;
		}
		for call_id in self.pending.unsent() {
			if !self.transmit(call_id) {
				break;
			}
		}
	}

	fn transmit(&mut self, call_id: CallId) -> bool {
		let Some(agent) = self.agent.as_mut() else {
			return false;
		};
		let Some(call) = self.pending.get(call_id) else {
			return true;
		};
		let channel = if self.use_io_channel || self.policy.sends_on_io_channel(&call.method) {
			AgentChannel::Io
		} else {
			AgentChannel::Default
		};
		let result = agent.send(AgentCommand {
			channel,
			call_id,
			method: &call.method,
			payload: &call.payload,
		});
		match result {
			Ok(()) => {
				self.pending.mark_transmitted(call_id);
				true
			}
			Err(err) => {
				warn!(session = %self.key, call_id, error = %err, "agent send failed, call stays queued");
				false
			}
		}
	}

	/// Handles a response or notification from the agent.
	pub fn on_agent_message(&mut self, generation: u64, message: AgentMessage) {
		if self.phase == Phase::Disposed || generation != self.generation {
			debug!(session = %self.key, generation, current = self.generation, "dropping stale agent message");
			return;
		}
		match message {
			AgentMessage::Response {
				call_id,
				payload,
				state,
			} => {
				if self.pending.remove(call_id).is_none() {
					// The agent state is still current even if the call was already answered.
					if let Some(update) = &state {
						self.state.apply(update);
					}
					debug!(session = %self.key, call_id, "response for unknown call dropped");
					return;
				}
				self.forward_to_client(&payload, state.as_ref());
			}
			AgentMessage::Notification { payload, state } => {
				self.forward_to_client(&payload, state.as_ref());
			}
		}
	}

	fn forward_to_client(&mut self, payload: &[u8], state: Option<&StateUpdate>) {
		if let Some(update) = state {
			self.state.apply(update);
		}
		match WireFormat::detect(payload).decode(payload) {
			Ok(message) => self.send_to_client(message),
			Err(err) => warn!(session = %self.key, error = %err, "dropping undecodable agent message"),
		}
	}

	/// Sends a message to the client, tagged with this session's id.
	pub fn send_to_client(&self, mut message: Value) {
		if self.phase == Phase::Disposed {
			return;
		}
		if !self.is_root() {
			set_session_id(&mut message, &self.id);
		}
		self.client.send(&message);
	}

	/// Answers a call; used for local results and synthesized errors.
	pub fn reply(&self, call_id: CallId, result: std::result::Result<Value, ProtocolError>) {
		self.send_to_client(Response::from_result(call_id, result).into_value());
	}

	/// Binds a new agent connection, detaching the previous one.
	///
	/// The new agent owes nothing, so every pending call becomes unsent; an
	/// active session transmits them right away.
	pub fn attach_agent(&mut self, host: &dyn AgentHost) -> Result<()> {
		if self.phase == Phase::Disposed {
			return Err(Error::Disposed(self.key));
		}
		self.detach_agent();
		self.pending.mark_all_unsent();

		let request = AttachRequest {
			session_id: self.id.clone(),
			target_id: self.target_id.clone(),
			state: self.state.clone(),
			use_io_channel: self.use_io_channel,
			sink: AgentSink::new(self.key, self.generation, self.events.clone()),
		};
		self.agent = Some(host.attach(request)?);
		self.flush();
		Ok(())
	}

	/// Drops the agent connection. Later messages from it are stale.
	pub fn detach_agent(&mut self) {
		if let Some(mut agent) = self.agent.take() {
			agent.detach();
		}
		self.generation += 1;
	}

	/// Pauses forwarding ahead of an agent swap.
	///
	/// Script-execution calls already in flight are failed: they would
	/// otherwise be replayed into a fresh JavaScript context.
	pub fn suspend(&mut self) {
		if self.phase != Phase::Active {
			return;
		}
		self.phase = Phase::Suspended;
		let policy = Arc::clone(&self.policy);
		let terminated = self
			.pending
			.drain_where(|call| call.sent && policy.terminates_on_navigation(&call.method));
		for call in terminated {
			self.reply(call.call_id, Err(ProtocolError::target_closed()));
		}
	}

	/// Resumes forwarding once the new agent is attached.
	///
	/// Script-execution calls queued during the swap are failed; everything
	/// else is transmitted in original order.
	pub fn resume(&mut self) {
		if self.phase != Phase::Suspended {
			return;
		}
		self.phase = Phase::Active;
		let policy = Arc::clone(&self.policy);
		let terminated = self
			.pending
			.drain_where(|call| policy.terminates_on_navigation(&call.method));
		for call in terminated {
			self.reply(call.call_id, Err(ProtocolError::target_closed()));
		}
		self.flush();
	}

	/// The agent died. Calls are failed unless they are expected to survive
	/// a crash; those wait for the next agent.
	pub fn agent_crashed(&mut self) {
		if self.phase == Phase::Disposed {
			return;
		}
		self.detach_agent();
		let policy = Arc::clone(&self.policy);
		let lost = self
			.pending
			.drain_where(|call| !policy.retained_on_crash(&call.method));
		for call in lost {
			self.reply(call.call_id, Err(ProtocolError::target_crashed()));
		}
		self.pending.mark_all_unsent();
	}

	/// Tears the session down. Every pending call is answered with the
	/// target-closed error; a root session given a `reason` also tells the
	/// client it was detached.
	pub fn dispose(&mut self, reason: Option<&str>) {
		if self.phase == Phase::Disposed {
			return;
		}
		self.dispatcher.disable_all();
		self.detach_agent();
		for call in self.pending.drain() {
			self.reply(call.call_id, Err(ProtocolError::target_closed()));
		}
		if let Some(reason) = reason {
			self.send_to_client(
				Notification::new("Inspector.detached", json!({ "reason": reason })).into_value(),
			);
		}
		self.children.clear();
		self.phase = Phase::Disposed;
	}

	/// Links a child session. Only a root session may have children.
	pub fn add_child(&mut self, session_id: &str, child: SessionKey) -> Result<()> {
		if !self.is_root() {
			return Err(Error::NotRootSession(self.key));
		}
		if self.phase == Phase::Disposed {
			return Err(Error::Disposed(self.key));
		}
		if self.children.contains_key(session_id) {
			return Err(Error::DuplicateSession(session_id.to_string()));
		}
		self.children.insert(session_id.to_string(), child);
		Ok(())
	}

	/// Unlinks a child without touching the child itself.
	pub fn remove_child(&mut self, session_id: &str) -> Option<SessionKey> {
		self.children.remove(session_id)
	}

	pub fn child(&self, session_id: &str) -> Option<SessionKey> {
		self.children.get(session_id).copied()
	}

	pub fn children(&self) -> impl Iterator<Item = (&str, SessionKey)> {
		self.children.iter().map(|(id, key)| (id.as_str(), *key))
	}
}
