use std::sync::Arc;

use serde_json::json;

use crate::handler::{DispatchOutcome, DomainHandler, MethodCall, Responder, SessionContext};
use crate::policy::RouterConfig;

/// `Browser` domain of the browser target.
pub struct BrowserHandler {
	config: Arc<RouterConfig>,
}

impl BrowserHandler {
	pub fn new(context: &SessionContext) -> Self {
		Self {
			config: Arc::clone(&context.config),
		}
	}
}

impl DomainHandler for BrowserHandler {
	fn name(&self) -> &str {
		"Browser"
	}

	fn methods(&self) -> Vec<String> {
		vec!["Browser.getVersion".to_string()]
	}

	fn dispatch(&mut self, _call: MethodCall, _responder: Responder) -> DispatchOutcome {
		DispatchOutcome::Done(Ok(json!({
			"protocolVersion": self.config.protocol_version,
			"product": self.config.product,
			"revision": env!("CARGO_PKG_VERSION"),
			"userAgent": self.config.user_agent,
			"jsVersion": "",
		})))
	}
}
