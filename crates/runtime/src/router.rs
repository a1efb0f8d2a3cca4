//! Target registry and session router.
//!
//! The [`Router`] owns every target and every session. It runs as a single
//! task that drains a queue of [`RouterEvent`]s, so session state is only
//! ever touched from one place; client sockets, agent links, and deferred
//! handlers talk to it through a [`RouterHandle`].
//!
//! Parent and child sessions refer to each other by [`SessionKey`]. Disposing
//! a root session disposes its children first.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dt_protocol::{CallId, Notification, ProtocolError, session_id};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentHost, AgentMessage};
use crate::client::{ClientId, ClientLink};
use crate::error::{Error, Result};
use crate::handler::{HandlerFactory, Responder, SessionContext};
use crate::handlers;
use crate::policy::{MethodPolicy, RouterConfig};
use crate::session::{Session, SessionKey, SessionSpec};

/// Kind of debuggable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
	/// The browser itself; served entirely by local handlers.
	Browser,
	Page,
	#[serde(rename = "iframe", alias = "frame")]
	Frame,
	/// Worker targets send all traffic over the IO channel.
	Worker,
}

impl TargetKind {
	pub fn as_str(self) -> &'static str {
		match self {
			TargetKind::Browser => "browser",
			TargetKind::Page => "page",
			TargetKind::Frame => "iframe",
			TargetKind::Worker => "worker",
		}
	}
}

impl fmt::Display for TargetKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
	pub id: String,
	pub kind: TargetKind,
	pub title: String,
	pub url: String,
	/// Target this one is nested in (the page of a frame or worker).
	pub parent_id: Option<String>,
}

impl TargetInfo {
	pub fn new(id: impl Into<String>, kind: TargetKind) -> Self {
		Self {
			id: id.into(),
			kind,
			title: String::new(),
			url: String::new(),
			parent_id: None,
		}
	}

	pub fn with_url(mut self, url: impl Into<String>) -> Self {
		self.url = url.into();
		self
	}

	pub fn with_title(mut self, title: impl Into<String>) -> Self {
		self.title = title.into();
		self
	}

	pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
		self.parent_id = Some(parent_id.into());
		self
	}

	/// `TargetInfo` object as reported by the Target domain.
	pub fn to_protocol(&self, attached: bool) -> Value {
		let mut info = json!({
			"targetId": self.id,
			"type": self.kind.as_str(),
			"title": self.title,
			"url": self.url,
			"attached": attached,
			"canAccessOpener": false,
		});
		if let (Some(parent), Some(object)) = (&self.parent_id, info.as_object_mut()) {
			object.insert("parentFrameId".to_string(), Value::String(parent.clone()));
		}
		info
	}
}

/// A registered target as seen from outside the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
	pub info: TargetInfo,
	pub attached: bool,
}

/// Target-domain requests from the built-in handler, answered through the
/// carried responder.
#[derive(Debug)]
pub enum TargetRequest {
	GetTargets {
		responder: Responder,
	},
	GetTargetInfo {
		target_id: Option<String>,
		responder: Responder,
	},
	AttachToTarget {
		target_id: String,
		responder: Responder,
	},
	DetachFromTarget {
		session_id: String,
		responder: Responder,
	},
	SetAutoAttach {
		auto_attach: bool,
		responder: Responder,
	},
}

/// Input to the router task.
pub enum RouterEvent {
	RegisterTarget {
		info: TargetInfo,
		host: Option<Arc<dyn AgentHost>>,
		reply: Option<oneshot::Sender<Result<()>>>,
	},
	DestroyTarget {
		target_id: String,
	},
	BeginNavigation {
		target_id: String,
	},
	CommitNavigation {
		target_id: String,
		host: Option<Arc<dyn AgentHost>>,
	},
	AgentCrashed {
		target_id: String,
	},
	ListTargets {
		reply: oneshot::Sender<Vec<TargetEntry>>,
	},
	ConnectClient {
		target_id: String,
		link: ClientLink,
		reply: oneshot::Sender<Result<ClientId>>,
	},
	ClientMessage {
		client: ClientId,
		bytes: Vec<u8>,
	},
	DisconnectClient {
		client: ClientId,
	},
	Agent {
		session: SessionKey,
		generation: u64,
		message: AgentMessage,
	},
	LocalResponse {
		session: SessionKey,
		call_id: CallId,
		result: std::result::Result<Value, ProtocolError>,
	},
	Target(TargetRequest),
	Shutdown,
}

impl fmt::Debug for RouterEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RouterEvent::RegisterTarget { info, .. } => {
				f.debug_struct("RegisterTarget").field("info", info).finish_non_exhaustive()
			}
			RouterEvent::DestroyTarget { target_id } => {
				f.debug_struct("DestroyTarget").field("target_id", target_id).finish()
			}
			RouterEvent::BeginNavigation { target_id } => {
				f.debug_struct("BeginNavigation").field("target_id", target_id).finish()
			}
			RouterEvent::CommitNavigation { target_id, host } => f
				.debug_struct("CommitNavigation")
				.field("target_id", target_id)
				.field("new_host", &host.is_some())
				.finish(),
			RouterEvent::AgentCrashed { target_id } => {
				f.debug_struct("AgentCrashed").field("target_id", target_id).finish()
			}
			RouterEvent::ListTargets { .. } => f.write_str("ListTargets"),
			RouterEvent::ConnectClient { target_id, link, .. } => f
				.debug_struct("ConnectClient")
				.field("target_id", target_id)
				.field("format", &link.format())
				.finish_non_exhaustive(),
			RouterEvent::ClientMessage { client, bytes } => f
				.debug_struct("ClientMessage")
				.field("client", client)
				.field("len", &bytes.len())
				.finish(),
			RouterEvent::DisconnectClient { client } => {
				f.debug_struct("DisconnectClient").field("client", client).finish()
			}
			RouterEvent::Agent {
				session,
				generation,
				message,
			} => f
				.debug_struct("Agent")
				.field("session", session)
				.field("generation", generation)
				.field("message", message)
				.finish(),
			RouterEvent::LocalResponse {
				session, call_id, ..
			} => f
				.debug_struct("LocalResponse")
				.field("session", session)
				.field("call_id", call_id)
				.finish_non_exhaustive(),
			RouterEvent::Target(request) => f.debug_tuple("Target").field(request).finish(),
			RouterEvent::Shutdown => f.write_str("Shutdown"),
		}
	}
}

/// Cloneable sender side of the router queue.
#[derive(Debug, Clone)]
pub struct RouterHandle {
	events: mpsc::UnboundedSender<RouterEvent>,
}

impl RouterHandle {
	pub fn post(&self, event: RouterEvent) -> Result<()> {
		self.events.send(event).map_err(|_| Error::RouterClosed)
	}

	pub async fn register_target(
		&self,
		info: TargetInfo,
		host: Option<Arc<dyn AgentHost>>,
	) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.post(RouterEvent::RegisterTarget {
			info,
			host,
			reply: Some(tx),
		})?;
		rx.await.map_err(|_| Error::RouterClosed)?
	}

	/// Opens a root session on a target for a new client.
	pub async fn connect_client(&self, target_id: &str, link: ClientLink) -> Result<ClientId> {
		let (tx, rx) = oneshot::channel();
		self.post(RouterEvent::ConnectClient {
			target_id: target_id.to_string(),
			link,
			reply: tx,
		})?;
		rx.await.map_err(|_| Error::RouterClosed)?
	}

	pub async fn targets(&self) -> Result<Vec<TargetEntry>> {
		let (tx, rx) = oneshot::channel();
		self.post(RouterEvent::ListTargets { reply: tx })?;
		rx.await.map_err(|_| Error::RouterClosed)
	}

	pub fn client_message(&self, client: ClientId, bytes: Vec<u8>) -> Result<()> {
		self.post(RouterEvent::ClientMessage { client, bytes })
	}

	pub fn disconnect_client(&self, client: ClientId) -> Result<()> {
		self.post(RouterEvent::DisconnectClient { client })
	}

	pub fn destroy_target(&self, target_id: &str) -> Result<()> {
		self.post(RouterEvent::DestroyTarget {
			target_id: target_id.to_string(),
		})
	}

	pub fn begin_navigation(&self, target_id: &str) -> Result<()> {
		self.post(RouterEvent::BeginNavigation {
			target_id: target_id.to_string(),
		})
	}

	pub fn commit_navigation(&self, target_id: &str, host: Option<Arc<dyn AgentHost>>) -> Result<()> {
		self.post(RouterEvent::CommitNavigation {
			target_id: target_id.to_string(),
			host,
		})
	}

	pub fn agent_crashed(&self, target_id: &str) -> Result<()> {
		self.post(RouterEvent::AgentCrashed {
			target_id: target_id.to_string(),
		})
	}

	pub fn shutdown(&self) -> Result<()> {
		self.post(RouterEvent::Shutdown)
	}
}

struct Target {
	info: TargetInfo,
	host: Option<Arc<dyn AgentHost>>,
	sessions: Vec<SessionKey>,
	navigating: bool,
}

/// Owner of all targets and sessions.
pub struct Router {
	config: Arc<RouterConfig>,
	policy: Arc<MethodPolicy>,
	factories: Vec<Arc<dyn HandlerFactory>>,
	targets: IndexMap<String, Target>,
	sessions: HashMap<SessionKey, Session>,
	clients: HashMap<ClientId, SessionKey>,
	next_session: u64,
	next_client: u64,
	events: mpsc::UnboundedSender<RouterEvent>,
}

/// Protocol id for a new child session.
fn new_session_id() -> String {
	Uuid::new_v4().simple().to_string().to_uppercase()
}

impl Router {
	/// Creates a router and the receiving end of its queue.
	pub fn new(config: RouterConfig) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let policy = Arc::new(config.policy.clone());
		let router = Self {
			config: Arc::new(config),
			policy,
			factories: Vec::new(),
			targets: IndexMap::new(),
			sessions: HashMap::new(),
			clients: HashMap::new(),
			next_session: 1,
			next_client: 1,
			events: tx,
		};
		(router, rx)
	}

	/// Adds handlers to every session created from now on.
	pub fn with_handlers(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
		self.factories.push(factory);
		self
	}

	pub fn handle(&self) -> RouterHandle {
		RouterHandle {
			events: self.events.clone(),
		}
	}

	pub fn config(&self) -> &RouterConfig {
		&self.config
	}

	/// Spawns the router task.
	pub fn spawn(self, events: mpsc::UnboundedReceiver<RouterEvent>) -> (RouterHandle, JoinHandle<()>) {
		let handle = self.handle();
		(handle, tokio::spawn(self.run(events)))
	}

	pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<RouterEvent>) {
		while let Some(event) = events.recv().await {
			if !self.process(event) {
				break;
			}
		}
		self.shutdown();
	}

	/// Applies one event. Returns false when the router should stop.
	pub fn process(&mut self, event: RouterEvent) -> bool {
		match event {
			RouterEvent::RegisterTarget { info, host, reply } => {
				let result = self.register_target(info, host);
				match reply {
					Some(reply) => {
						let _ = reply.send(result);
					}
					None => {
						if let Err(err) = result {
							warn!(error = %err, "target registration failed");
						}
					}
				}
			}
			RouterEvent::DestroyTarget { target_id } => {
				log_failure(self.destroy_target(&target_id));
			}
			RouterEvent::BeginNavigation { target_id } => {
				log_failure(self.begin_navigation(&target_id));
			}
			RouterEvent::CommitNavigation { target_id, host } => {
				log_failure(self.commit_navigation(&target_id, host));
			}
			RouterEvent::AgentCrashed { target_id } => {
				log_failure(self.agent_crashed(&target_id));
			}
			RouterEvent::ListTargets { reply } => {
				let _ = reply.send(self.targets().collect());
			}
			RouterEvent::ConnectClient {
				target_id,
				link,
				reply,
			} => {
				let _ = reply.send(self.connect_client(&target_id, link));
			}
			RouterEvent::ClientMessage { client, bytes } => {
				log_failure(self.client_message(client, &bytes));
			}
			RouterEvent::DisconnectClient { client } => {
				log_failure(self.disconnect_client(client));
			}
			RouterEvent::Agent {
				session,
				generation,
				message,
			} => match self.sessions.get_mut(&session) {
				Some(entry) => entry.on_agent_message(generation, message),
				None => debug!(%session, "agent message for closed session dropped"),
			},
			RouterEvent::LocalResponse {
				session,
				call_id,
				result,
			} => match self.sessions.get(&session) {
				Some(entry) => entry.reply(call_id, result),
				None => debug!(%session, call_id, "local response for closed session dropped"),
			},
			RouterEvent::Target(request) => self.handle_target_request(request),
			RouterEvent::Shutdown => return false,
		}
		true
	}

	pub fn register_target(
		&mut self,
		info: TargetInfo,
		host: Option<Arc<dyn AgentHost>>,
	) -> Result<()> {
		if self.targets.contains_key(&info.id) {
			return Err(Error::DuplicateTarget(info.id));
		}
		info!(target_id = %info.id, kind = %info.kind, url = %info.url, "target registered");
		let target_id = info.id.clone();
		self.targets.insert(
			target_id.clone(),
			Target {
				info,
				host,
				sessions: Vec::new(),
				navigating: false,
			},
		);

		for owner in self.owners_of(&target_id) {
			for parent in self.auto_attaching_sessions(&owner) {
				self.auto_attach(parent, &target_id);
			}
		}
		Ok(())
	}

	/// Disposes every session on the target and forgets it.
	pub fn destroy_target(&mut self, target_id: &str) -> Result<()> {
		let target = self
			.targets
			.shift_remove(target_id)
			.ok_or_else(|| Error::TargetNotFound(target_id.to_string()))?;
		info!(target_id, sessions = target.sessions.len(), "target destroyed");
		for key in target.sessions {
			self.dispose_session(key, Some("target_closed"));
		}
		Ok(())
	}

	/// Suspends the target's sessions ahead of an agent swap.
	pub fn begin_navigation(&mut self, target_id: &str) -> Result<()> {
		let target = self
			.targets
			.get_mut(target_id)
			.ok_or_else(|| Error::TargetNotFound(target_id.to_string()))?;
		target.navigating = true;
		info!(target_id, sessions = target.sessions.len(), "navigation started");
		for key in &target.sessions {
			if let Some(session) = self.sessions.get_mut(key) {
				session.suspend();
			}
		}
		Ok(())
	}

	/// Rebinds the target's sessions to a fresh agent and resumes them.
	///
	/// Without a new host the current one is asked for a new connection.
	pub fn commit_navigation(
		&mut self,
		target_id: &str,
		host: Option<Arc<dyn AgentHost>>,
	) -> Result<()> {
		let target = self
			.targets
			.get_mut(target_id)
			.ok_or_else(|| Error::TargetNotFound(target_id.to_string()))?;
		if host.is_some() {
			target.host = host;
		}
		target.navigating = false;
		info!(target_id, sessions = target.sessions.len(), "navigation committed");

		for key in &target.sessions {
			let Some(session) = self.sessions.get_mut(key) else {
				continue;
			};
			// A commit with no prior begin still swaps the agent under live calls.
			session.suspend();
			if let Some(host) = &target.host {
				if let Err(err) = session.attach_agent(host.as_ref()) {
					warn!(session = %key, error = %err, "agent attach failed after navigation");
				}
			}
			session.resume();
		}
		Ok(())
	}

	pub fn agent_crashed(&mut self, target_id: &str) -> Result<()> {
		let target = self
			.targets
			.get(target_id)
			.ok_or_else(|| Error::TargetNotFound(target_id.to_string()))?;
		warn!(target_id, "agent crashed");
		for key in &target.sessions {
			if let Some(session) = self.sessions.get_mut(key) {
				session.agent_crashed();
				if session.is_root() {
					session.send_to_client(
						Notification::new("Inspector.targetCrashed", json!({})).into_value(),
					);
				}
			}
		}
		Ok(())
	}

	/// Opens a root session for a new client.
	pub fn connect_client(&mut self, target_id: &str, link: ClientLink) -> Result<ClientId> {
		let key = self.create_session(target_id, String::new(), None, link)?;
		let client = ClientId(self.next_client);
		self.next_client += 1;
		self.clients.insert(client, key);
		info!(%client, target_id, session = %key, "client connected");
		Ok(client)
	}

	/// Routes raw bytes from a client. Undecodable input is dropped.
	pub fn client_message(&mut self, client: ClientId, bytes: &[u8]) -> Result<()> {
		let key = *self.clients.get(&client).ok_or(Error::ClientNotFound(client))?;
		let format = self
			.sessions
			.get(&key)
			.map(Session::client_format)
			.ok_or(Error::SessionNotFound(key))?;
		match format.decode(bytes) {
			Ok(message) => self.dispatch_message(key, message),
			Err(err) => warn!(%client, %format, error = %err, "dropping undecodable client message"),
		}
		Ok(())
	}

	/// Closes the client's root session and everything attached to it.
	pub fn disconnect_client(&mut self, client: ClientId) -> Result<()> {
		let key = self.clients.remove(&client).ok_or(Error::ClientNotFound(client))?;
		self.dispose_session(key, None);
		info!(%client, "client disconnected");
		Ok(())
	}

	/// Delivers a decoded message to the session it addresses.
	///
	/// A `sessionId` tag selects a child of `key`; messages for unknown
	/// children are dropped since the child may have detached mid-flight.
	pub fn dispatch_message(&mut self, key: SessionKey, message: Value) {
		let Some(session) = self.sessions.get(&key) else {
			debug!(session = %key, "message for closed session dropped");
			return;
		};
		let destination = match session_id(&message) {
			Some(child_id) => match session.child(child_id) {
				Some(child) => child,
				None => {
					debug!(session = %key, child = child_id, "message for unknown child session dropped");
					return;
				}
			},
			None => key,
		};
		match self.sessions.get_mut(&destination) {
			Some(session) => session.dispatch_command(message),
			None => debug!(session = %destination, "message for closed child session dropped"),
		}
	}

	/// Creates a child session of `parent` on `target_id`.
	pub fn attach_child(
		&mut self,
		parent: SessionKey,
		session_id: String,
		target_id: &str,
	) -> Result<SessionKey> {
		let parent_session = self.sessions.get(&parent).ok_or(Error::SessionNotFound(parent))?;
		if !parent_session.is_root() {
			return Err(Error::NotRootSession(parent));
		}
		let target = self
			.targets
			.get(target_id)
			.ok_or_else(|| Error::TargetNotFound(target_id.to_string()))?;
		let taken = parent_session.child(&session_id).is_some()
			|| target
				.sessions
				.iter()
				.filter_map(|key| self.sessions.get(key))
				.any(|session| session.id() == session_id);
		if taken {
			return Err(Error::DuplicateSession(session_id));
		}

		let link = parent_session.client_link().clone();
		let child = self.create_session(target_id, session_id.clone(), Some(parent), link)?;
		if let Some(parent_session) = self.sessions.get_mut(&parent) {
			parent_session.add_child(&session_id, child)?;
		}
		debug!(%parent, %child, session_id, target_id, "child session attached");
		Ok(child)
	}

	/// Unlinks a child from its parent and disposes it.
	pub fn detach_child(&mut self, parent: SessionKey, session_id: &str) -> Result<()> {
		let child = self
			.sessions
			.get_mut(&parent)
			.ok_or(Error::SessionNotFound(parent))?
			.remove_child(session_id)
			.ok_or_else(|| Error::ChildNotFound(session_id.to_string()))?;
		self.dispose_session(child, None);
		Ok(())
	}

	pub fn session(&self, key: SessionKey) -> Option<&Session> {
		self.sessions.get(&key)
	}

	/// Root session of a connected client.
	pub fn client_session(&self, client: ClientId) -> Option<&Session> {
		self.clients.get(&client).and_then(|key| self.sessions.get(key))
	}

	pub fn session_count(&self) -> usize {
		self.sessions.len()
	}

	/// Registered targets in registration order.
	pub fn targets(&self) -> impl Iterator<Item = TargetEntry> + '_ {
		self.targets.values().map(|target| TargetEntry {
			info: target.info.clone(),
			attached: !target.sessions.is_empty(),
		})
	}

	pub fn target_sessions(&self, target_id: &str) -> Vec<SessionKey> {
		self.targets
			.get(target_id)
			.map(|target| target.sessions.clone())
			.unwrap_or_default()
	}

	/// Disposes every session and forgets every target.
	pub fn shutdown(&mut self) {
		let roots: Vec<SessionKey> = self
			.sessions
			.values()
			.filter(|session| session.is_root())
			.map(Session::key)
			.collect();
		for key in roots {
			self.dispose_session(key, None);
		}
		self.clients.clear();
		self.targets.clear();
		info!("router stopped");
	}

	fn create_session(
		&mut self,
		target_id: &str,
		session_id: String,
		parent: Option<SessionKey>,
		link: ClientLink,
	) -> Result<SessionKey> {
		let target = self
			.targets
			.get(target_id)
			.ok_or_else(|| Error::TargetNotFound(target_id.to_string()))?;
		let key = SessionKey(self.next_session);
		self.next_session += 1;

		let mut session = Session::new(
			SessionSpec {
				key,
				id: session_id,
				parent,
				target_id: target_id.to_string(),
				browser_only: target.info.kind == TargetKind::Browser,
				use_io_channel: target.info.kind == TargetKind::Worker,
			},
			link,
			Arc::clone(&self.policy),
			self.events.clone(),
		);

		let context = SessionContext {
			session: key,
			session_id: session.id().to_string(),
			target: target.info.clone(),
			router: self.handle(),
			config: Arc::clone(&self.config),
		};
		let extra = self.factories.iter().flat_map(|factory| factory.create(&context));
		for handler in handlers::builtin(&context).into_iter().chain(extra) {
			session.register_handler(handler)?;
		}

		if target.navigating {
			session.suspend();
		} else if let Some(host) = &target.host {
			if let Err(err) = session.attach_agent(host.as_ref()) {
				warn!(session = %key, target_id, error = %err, "agent attach failed");
			}
		}

		self.sessions.insert(key, session);
		if let Some(target) = self.targets.get_mut(target_id) {
			target.sessions.push(key);
		}
		Ok(key)
	}

	fn dispose_session(&mut self, key: SessionKey, reason: Option<&str>) {
		let Some(mut session) = self.sessions.remove(&key) else {
			return;
		};
		let children: Vec<SessionKey> = session.children().map(|(_, child)| child).collect();
		for child in children {
			self.dispose_session(child, None);
		}

		let reason = if session.is_root() { reason } else { None };
		session.dispose(reason);

		if let Some(target) = self.targets.get_mut(session.target_id()) {
			target.sessions.retain(|k| *k != key);
		}
		if let Some(parent) = session.parent().and_then(|p| self.sessions.get_mut(&p)) {
			parent.remove_child(session.id());
			parent.send_to_client(
				Notification::new(
					"Target.detachedFromTarget",
					json!({ "sessionId": session.id(), "targetId": session.target_id() }),
				)
				.into_value(),
			);
		}
		self.clients.retain(|_, root| *root != key);
		debug!(session = %key, "session disposed");
	}

	/// Targets whose auto-attaching sessions pick up `target_id`.
	///
	/// A nested target belongs to its parent; a top-level target belongs to
	/// every browser target.
	fn owners_of(&self, target_id: &str) -> Vec<String> {
		let Some(target) = self.targets.get(target_id) else {
			return Vec::new();
		};
		match (&target.info.parent_id, target.info.kind) {
			(Some(parent), _) => vec![parent.clone()],
			(None, TargetKind::Browser) => Vec::new(),
			(None, _) => self
				.targets
				.values()
				.filter(|t| t.info.kind == TargetKind::Browser)
				.map(|t| t.info.id.clone())
				.collect(),
		}
	}

	fn auto_attaching_sessions(&self, target_id: &str) -> Vec<SessionKey> {
		self.target_sessions(target_id)
			.into_iter()
			.filter(|key| {
				self.sessions
					.get(key)
					.is_some_and(|session| session.is_root() && session.auto_attach())
			})
			.collect()
	}

	fn has_child_on(&self, parent: SessionKey, target_id: &str) -> bool {
		self.sessions.get(&parent).is_some_and(|session| {
			session.children().any(|(_, child)| {
				self.sessions
					.get(&child)
					.is_some_and(|child| child.target_id() == target_id)
			})
		})
	}

	fn auto_attach(&mut self, parent: SessionKey, target_id: &str) {
		let session_id = new_session_id();
		match self.attach_child(parent, session_id.clone(), target_id) {
			Ok(_) => self.notify_attached(parent, &session_id, target_id),
			Err(err) => warn!(%parent, target_id, error = %err, "auto-attach failed"),
		}
	}

	fn notify_attached(&self, parent: SessionKey, session_id: &str, target_id: &str) {
		let (Some(session), Some(target)) = (self.sessions.get(&parent), self.targets.get(target_id))
		else {
			return;
		};
		session.send_to_client(
			Notification::new(
				"Target.attachedToTarget",
				json!({
					"sessionId": session_id,
					"targetInfo": target.info.to_protocol(true),
					"waitingForDebugger": false,
				}),
			)
			.into_value(),
		);
	}

	fn set_auto_attach(&mut self, key: SessionKey, enabled: bool) -> Result<()> {
		let session = self.sessions.get_mut(&key).ok_or(Error::SessionNotFound(key))?;
		if !session.is_root() {
			return Err(Error::NotRootSession(key));
		}
		session.set_auto_attach(enabled);
		if !enabled {
			return Ok(());
		}
		let own_target = session.target_id().to_string();
		let candidates: Vec<String> = self
			.targets
			.keys()
			.filter(|id| self.owners_of(id).contains(&own_target))
			.cloned()
			.collect();
		for target_id in candidates {
			if !self.has_child_on(key, &target_id) {
				self.auto_attach(key, &target_id);
			}
		}
		Ok(())
	}

	fn handle_target_request(&mut self, request: TargetRequest) {
		match request {
			TargetRequest::GetTargets { responder } => {
				let infos: Vec<Value> = self
					.targets
					.values()
					.map(|target| target.info.to_protocol(!target.sessions.is_empty()))
					.collect();
				responder.send(Ok(json!({ "targetInfos": infos })));
			}
			TargetRequest::GetTargetInfo {
				target_id,
				responder,
			} => {
				let own_target = self
					.sessions
					.get(&responder.session())
					.map(|session| session.target_id().to_string());
				let result = target_id
					.or(own_target)
					.and_then(|id| self.targets.get(&id))
					.map(|target| {
						json!({ "targetInfo": target.info.to_protocol(!target.sessions.is_empty()) })
					})
					.ok_or_else(|| ProtocolError::invalid_params("No target with given id found"));
				responder.send(result);
			}
			TargetRequest::AttachToTarget {
				target_id,
				responder,
			} => {
				let parent = responder.session();
				let session_id = new_session_id();
				match self.attach_child(parent, session_id.clone(), &target_id) {
					Ok(_) => {
						self.notify_attached(parent, &session_id, &target_id);
						responder.send(Ok(json!({ "sessionId": session_id })));
					}
					Err(Error::TargetNotFound(_)) => {
						responder.send(Err(ProtocolError::invalid_params(
							"No target with given id found",
						)));
					}
					Err(err) => responder.send(Err(ProtocolError::server_error(err.to_string()))),
				}
			}
			TargetRequest::DetachFromTarget {
				session_id,
				responder,
			} => {
				let result = match self.detach_child(responder.session(), &session_id) {
					Ok(()) => Ok(json!({})),
					Err(_) => Err(ProtocolError::invalid_params("No session with given id")),
				};
				responder.send(result);
			}
			TargetRequest::SetAutoAttach {
				auto_attach,
				responder,
			} => {
				let result = self
					.set_auto_attach(responder.session(), auto_attach)
					.map(|()| json!({}))
					.map_err(|err| ProtocolError::server_error(err.to_string()));
				responder.send(result);
			}
		}
	}
}

fn log_failure(result: Result<()>) {
	if let Err(err) = result {
		debug!(error = %err, "router event ignored");
	}
}
