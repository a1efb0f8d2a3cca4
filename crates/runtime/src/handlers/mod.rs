//! Domains every session serves locally.

mod browser;
mod target;

pub use browser::BrowserHandler;
pub use target::TargetHandler;

use crate::handler::{DomainHandler, SessionContext};
use crate::router::TargetKind;

/// Handlers installed on every new session.
pub fn builtin(context: &SessionContext) -> Vec<Box<dyn DomainHandler>> {
	let mut handlers: Vec<Box<dyn DomainHandler>> = Vec::new();
	if context.target.kind == TargetKind::Browser {
		handlers.push(Box::new(BrowserHandler::new(context)));
	}
	handlers.push(Box::new(TargetHandler::new(context)));
	handlers
}
