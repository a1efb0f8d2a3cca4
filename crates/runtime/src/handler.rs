//! Local domain handlers.
//!
//! A [`DomainHandler`] services a fixed set of methods inside the router
//! instead of forwarding them to an agent. Handlers either answer at once or
//! keep the [`Responder`] and complete later.

use std::sync::Arc;

use dt_protocol::{CallId, ProtocolError};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::policy::RouterConfig;
use crate::router::{RouterEvent, RouterHandle, TargetInfo};
use crate::session::SessionKey;

/// A command addressed to a local handler.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
	pub call_id: CallId,
	pub method: String,
	pub params: Map<String, Value>,
}

impl MethodCall {
	/// Reads an optional string parameter.
	pub fn str_param(&self, name: &str) -> Result<Option<&str>, ProtocolError> {
		match self.params.get(name) {
			None | Some(Value::Null) => Ok(None),
			Some(Value::String(s)) => Ok(Some(s)),
			Some(_) => Err(ProtocolError::invalid_params(format!(
				"{name}: string value expected"
			))),
		}
	}

	pub fn required_str(&self, name: &str) -> Result<&str, ProtocolError> {
		self.str_param(name)?
			.ok_or_else(|| ProtocolError::invalid_params(format!("{name}: string value expected")))
	}

	pub fn bool_param(&self, name: &str) -> Result<Option<bool>, ProtocolError> {
		match self.params.get(name) {
			None | Some(Value::Null) => Ok(None),
			Some(Value::Bool(b)) => Ok(Some(*b)),
			Some(_) => Err(ProtocolError::invalid_params(format!(
				"{name}: boolean value expected"
			))),
		}
	}
}

/// Result of offering a call to a handler.
#[derive(Debug)]
pub enum DispatchOutcome {
	/// Answered synchronously.
	Done(Result<Value, ProtocolError>),
	/// The handler kept the responder and answers later.
	Deferred,
	/// Observed locally, but the agent must still receive the call.
	FallThrough,
}

/// Completes a deferred call.
///
/// The answer travels through the router queue; it is discarded if the
/// session has been disposed in the meantime.
#[derive(Debug)]
pub struct Responder {
	session: SessionKey,
	call_id: CallId,
	events: mpsc::UnboundedSender<RouterEvent>,
}

impl Responder {
	pub(crate) fn new(
		session: SessionKey,
		call_id: CallId,
		events: mpsc::UnboundedSender<RouterEvent>,
	) -> Self {
		Self {
			session,
			call_id,
			events,
		}
	}

	pub fn session(&self) -> SessionKey {
		self.session
	}

	pub fn call_id(&self) -> CallId {
		self.call_id
	}

	pub fn send(self, result: Result<Value, ProtocolError>) {
		let _ = self.events.send(RouterEvent::LocalResponse {
			session: self.session,
			call_id: self.call_id,
			result,
		});
	}
}

/// A protocol domain implemented inside the router.
pub trait DomainHandler: Send {
	/// Domain name, used for bookkeeping and logs.
	fn name(&self) -> &str;

	/// Fully qualified methods this handler services.
	fn methods(&self) -> Vec<String>;

	fn dispatch(&mut self, call: MethodCall, responder: Responder) -> DispatchOutcome;

	/// Called once when the owning session is disposed.
	fn disable(&mut self) {}
}

/// What a handler factory knows about the session it equips.
#[derive(Debug, Clone)]
pub struct SessionContext {
	pub session: SessionKey,
	pub session_id: String,
	pub target: TargetInfo,
	pub router: RouterHandle,
	pub config: Arc<RouterConfig>,
}

/// Builds the handlers of each new session.
pub trait HandlerFactory: Send + Sync {
	fn create(&self, context: &SessionContext) -> Vec<Box<dyn DomainHandler>>;
}

impl<F> HandlerFactory for F
where
	F: Fn(&SessionContext) -> Vec<Box<dyn DomainHandler>> + Send + Sync,
{
	fn create(&self, context: &SessionContext) -> Vec<Box<dyn DomainHandler>> {
		self(context)
	}
}
