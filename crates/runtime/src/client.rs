//! Client-side output of a session.

use std::fmt;

use dt_protocol::WireFormat;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// Identifies a connected client for the lifetime of the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "client-{}", self.0)
	}
}

/// Where a session's outbound messages go, and in which encoding.
///
/// The format is fixed when the client connects; child sessions share their
/// parent's link.
#[derive(Debug, Clone)]
pub struct ClientLink {
	format: WireFormat,
	tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ClientLink {
	pub fn new(format: WireFormat, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
		Self { format, tx }
	}

	/// Creates a link together with the receiving end of its frames.
	pub fn channel(format: WireFormat) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self::new(format, tx), rx)
	}

	pub fn format(&self) -> WireFormat {
		self.format
	}

	/// Encodes and queues a message. Encoding failures drop the message.
	pub fn send(&self, message: &Value) {
		match self.format.encode(message) {
			Ok(bytes) => {
				// The receiver is gone once the client disconnects; its session
				// is disposed right after.
				let _ = self.tx.send(bytes);
			}
			Err(err) => warn!(format = %self.format, error = %err, "dropping unencodable client message"),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}
