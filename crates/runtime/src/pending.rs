//! Pending call table.
//!
//! Tracks calls forwarded to an agent until their response arrives. Entries
//! stay in insertion order across removals so a replay after suspension
//! transmits calls in the order the client issued them.

use dt_protocol::CallId;
use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::error::{Error, Result};

/// A command forwarded (or queued for forwarding) to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
	pub call_id: CallId,
	pub method: String,
	/// Command in binary form, ready to hand to the agent.
	pub payload: Vec<u8>,
	/// Transmitted to the current agent and awaiting its response.
	pub sent: bool,
}

/// Calls awaiting a response, keyed by call id.
///
/// Uses IndexMap for O(1) removal with stable insertion order.
#[derive(Debug, Default)]
pub struct PendingCallTable {
	calls: IndexMap<CallId, PendingCall>,
}

impl PendingCallTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a call that has not been transmitted yet.
	///
	/// A second call with an id that is still pending is rejected and the
	/// existing entry is left untouched.
	pub fn add(
		&mut self,
		call_id: CallId,
		method: impl Into<String>,
		payload: Vec<u8>,
	) -> Result<&mut PendingCall> {
		match self.calls.entry(call_id) {
			Entry::Occupied(_) => Err(Error::DuplicateCallId(call_id)),
			Entry::Vacant(slot) => Ok(slot.insert(PendingCall {
				call_id,
				method: method.into(),
				payload,
				sent: false,
			})),
		}
	}

	/// Removes a call. Late and duplicate responses make a miss routine.
	pub fn remove(&mut self, call_id: CallId) -> Option<PendingCall> {
		self.calls.shift_remove(&call_id)
	}

	pub fn get(&self, call_id: CallId) -> Option<&PendingCall> {
		self.calls.get(&call_id)
	}

	pub fn contains(&self, call_id: CallId) -> bool {
		self.calls.contains_key(&call_id)
	}

	pub fn len(&self) -> usize {
		self.calls.len()
	}

	pub fn is_empty(&self) -> bool {
		self.calls.is_empty()
	}

	/// All calls in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = &PendingCall> {
		self.calls.values()
	}

	/// Visits the calls the current agent owes a response for.
	pub fn for_each_waiting(&self, f: impl FnMut(&PendingCall)) {
		self.calls.values().filter(|call| call.sent).for_each(f);
	}

	/// Call ids not yet transmitted, in order.
	pub fn unsent(&self) -> Vec<CallId> {
		self.calls
			.values()
			.filter(|call| !call.sent)
			.map(|call| call.call_id)
			.collect()
	}

	pub fn mark_transmitted(&mut self, call_id: CallId) {
		if let Some(call) = self.calls.get_mut(&call_id) {
			call.sent = true;
		}
	}

	/// Forgets which calls reached the agent, queuing all of them for replay.
	pub fn mark_all_unsent(&mut self) {
		for call in self.calls.values_mut() {
			call.sent = false;
		}
	}

	/// Removes the calls matching `predicate`, keeping the order of both the
	/// removed and the remaining calls.
	pub fn drain_where(&mut self, mut predicate: impl FnMut(&PendingCall) -> bool) -> Vec<PendingCall> {
		let (removed, kept): (IndexMap<_, _>, IndexMap<_, _>) = std::mem::take(&mut self.calls)
			.into_iter()
			.partition(|(_, call)| predicate(call));
		self.calls = kept;
		removed.into_values().collect()
	}

	/// Empties the table, returning every call in insertion order.
	pub fn drain(&mut self) -> Vec<PendingCall> {
		self.calls.drain(..).map(|(_, call)| call).collect()
	}
}
