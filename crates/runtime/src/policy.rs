//! Method allowlists and router configuration.
//!
//! Three fixed method lists shape how forwarded calls are treated. They are
//! kept as data rather than scattered checks so a deployment can inspect or
//! replace them from a config file.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Methods that must not queue behind bulk traffic on the default channel.
pub const IO_CHANNEL_METHODS: &[&str] = &[
	"Debugger.getPossibleBreakpoints",
	"Debugger.getScriptSource",
	"Debugger.getStackTrace",
	"Debugger.pause",
	"Debugger.removeBreakpoint",
	"Debugger.resume",
	"Debugger.setBreakpoint",
	"Debugger.setBreakpointByUrl",
	"Debugger.setBreakpointsActive",
	"Emulation.setScriptExecutionDisabled",
	"Page.crash",
	"Performance.getMetrics",
	"Runtime.terminateExecution",
];

/// Script-execution calls failed rather than replayed across a cross-process
/// navigation.
pub const TERMINATE_ON_NAVIGATION_METHODS: &[&str] = &[
	"Runtime.awaitPromise",
	"Runtime.callFunctionOn",
	"Runtime.evaluate",
	"Runtime.runScript",
	"Runtime.terminateExecution",
];

/// Calls kept for the next agent when the current one crashes.
pub const RETAIN_ON_CRASH_METHODS: &[&str] = &["Page.reload"];

fn method_set(methods: &[&str]) -> BTreeSet<String> {
	methods.iter().map(|m| m.to_string()).collect()
}

/// Per-method treatment of forwarded calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MethodPolicy {
	pub io_channel: BTreeSet<String>,
	pub terminate_on_navigation: BTreeSet<String>,
	pub retain_on_crash: BTreeSet<String>,
}

impl Default for MethodPolicy {
	fn default() -> Self {
		Self {
			io_channel: method_set(IO_CHANNEL_METHODS),
			terminate_on_navigation: method_set(TERMINATE_ON_NAVIGATION_METHODS),
			retain_on_crash: method_set(RETAIN_ON_CRASH_METHODS),
		}
	}
}

impl MethodPolicy {
	pub fn sends_on_io_channel(&self, method: &str) -> bool {
		self.io_channel.contains(method)
	}

	pub fn terminates_on_navigation(&self, method: &str) -> bool {
		self.terminate_on_navigation.contains(method)
	}

	pub fn retained_on_crash(&self, method: &str) -> bool {
		self.retain_on_crash.contains(method)
	}
}

/// Router-wide settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterConfig {
	pub policy: MethodPolicy,
	/// Reported by `Browser.getVersion`.
	pub product: String,
	pub protocol_version: String,
	pub user_agent: String,
}

impl Default for RouterConfig {
	fn default() -> Self {
		Self {
			policy: MethodPolicy::default(),
			product: format!("dtmux/{}", env!("CARGO_PKG_VERSION")),
			protocol_version: "1.3".to_string(),
			user_agent: String::new(),
		}
	}
}
