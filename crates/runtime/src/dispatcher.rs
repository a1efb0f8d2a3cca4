//! Method-name routing to local domain handlers.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::handler::{DispatchOutcome, DomainHandler, MethodCall, Responder};

/// Maps method names to the local handler that services them.
#[derive(Default)]
pub struct DomainDispatcher {
	handlers: Vec<Box<dyn DomainHandler>>,
	routes: HashMap<String, usize>,
}

impl std::fmt::Debug for DomainDispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DomainDispatcher")
			.field("domains", &self.domains().collect::<Vec<_>>())
			.field("methods", &self.routes.len())
			.finish()
	}
}

impl DomainDispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a handler. Every method may belong to one handler only; on
	/// conflict nothing is registered.
	pub fn register(&mut self, handler: Box<dyn DomainHandler>) -> Result<()> {
		let methods = handler.methods();
		for (i, method) in methods.iter().enumerate() {
			if let Some(&owner) = self.routes.get(method) {
				return Err(Error::DuplicateMethod {
					method: method.clone(),
					handler: self.handlers[owner].name().to_string(),
				});
			}
			if methods[..i].contains(method) {
				return Err(Error::DuplicateMethod {
					method: method.clone(),
					handler: handler.name().to_string(),
				});
			}
		}

		let index = self.handlers.len();
		debug!(handler = handler.name(), methods = methods.len(), "registered domain handler");
		self.routes.extend(methods.into_iter().map(|m| (m, index)));
		self.handlers.push(handler);
		Ok(())
	}

	pub fn can_dispatch_locally(&self, method: &str) -> bool {
		self.routes.contains_key(method)
	}

	/// Offers a call to its handler. Returns `None` when no handler owns the
	/// method; the responder is dropped in that case.
	pub fn dispatch(&mut self, call: MethodCall, responder: Responder) -> Option<DispatchOutcome> {
		let index = *self.routes.get(&call.method)?;
		Some(self.handlers[index].dispatch(call, responder))
	}

	/// Disables every handler and forgets all routes. Safe to call twice.
	pub fn disable_all(&mut self) {
		self.routes.clear();
		for mut handler in self.handlers.drain(..) {
			handler.disable();
		}
	}

	/// Names of the registered handlers, in registration order.
	pub fn domains(&self) -> impl Iterator<Item = &str> {
		self.handlers.iter().map(|h| h.name())
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}
}
