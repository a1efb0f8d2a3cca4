//! Server configuration: an optional JSON file plus command-line overrides.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use dt_runtime::RouterConfig;
use serde::{Deserialize, Serialize};

use crate::cli::ServeArgs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	pub host: String,
	pub port: u16,
	/// Id of the browser target served on `/devtools/browser`.
	pub browser_target_id: String,
	/// How long a target outlives its agent link while waiting for the agent
	/// to reconnect.
	pub agent_reconnect_grace_ms: u64,
	pub router: RouterConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 9222,
			browser_target_id: "browser".to_string(),
			agent_reconnect_grace_ms: 2000,
			router: RouterConfig::default(),
		}
	}
}

impl Config {
	pub fn from_file(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file {}", path.display()))?;
		serde_json::from_str(&raw)
			.with_context(|| format!("Invalid config file {}", path.display()))
	}

	/// Loads the file named by `--config` (if any) and applies the other flags.
	pub fn resolve(args: &ServeArgs) -> Result<Self> {
		let mut config = match &args.config {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		if let Some(host) = &args.host {
			config.host = host.clone();
		}
		if let Some(port) = args.port {
			config.port = port;
		}
		Ok(config)
	}

	pub fn addr(&self) -> Result<SocketAddr> {
		format!("{}:{}", self.host, self.port)
			.parse()
			.with_context(|| format!("Invalid host/port combination: {}:{}", self.host, self.port))
	}

	pub fn reconnect_grace(&self) -> Duration {
		Duration::from_millis(self.agent_reconnect_grace_ms)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn test_file_values_and_overrides() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{"port": 9333, "agentReconnectGraceMs": 50, "router": {{"product": "Test/2"}}}}"#
		)
		.unwrap();

		let args = ServeArgs {
			config: Some(file.path().to_path_buf()),
			host: Some("0.0.0.0".to_string()),
			port: None,
		};
		let config = Config::resolve(&args).unwrap();
		assert_eq!(config.host, "0.0.0.0");
		assert_eq!(config.port, 9333);
		assert_eq!(config.reconnect_grace(), Duration::from_millis(50));
		assert_eq!(config.router.product, "Test/2");
		assert!(config.router.policy.sends_on_io_channel("Debugger.pause"));
		assert_eq!(config.addr().unwrap().port(), 9333);
	}

	#[test]
	fn test_invalid_file_is_reported() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "port = 1").unwrap();
		let err = Config::from_file(file.path()).unwrap_err();
		assert!(err.to_string().contains("Invalid config file"));
	}

	#[test]
	fn test_bad_host_fails_to_parse() {
		let config = Config {
			host: "not a host".to_string(),
			..Config::default()
		};
		assert!(config.addr().is_err());
	}
}
