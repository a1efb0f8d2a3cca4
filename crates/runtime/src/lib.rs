//! Session routing for the DevTools protocol.
//!
//! Multiplexes protocol traffic between clients and the agents that execute
//! commands, with browser-side domain handlers in between:
//!
//! - **Sessions** own a pending call table and a domain dispatcher, and hold
//!   at most one agent connection
//! - **Child sessions** address sub-targets (frames, workers) through their
//!   parent's client connection via the `sessionId` tag
//! - **Suspension** queues forwarded calls while a target's agent is replaced
//!   during navigation, then replays them in order
//!
//! # Main Types
//!
//! - [`Router`] - Owns all targets and sessions; run as a single task
//! - [`RouterHandle`] - Cloneable way in for sockets, agents, and handlers
//! - [`Session`] - One client's conversation with one target
//! - [`AgentHost`], [`AgentConnection`] - Boundary to the executing agents
//! - [`DomainHandler`] - Locally serviced protocol domain
//! - [`MethodPolicy`] - Method allowlists governing forwarded calls

pub mod agent;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod pending;
pub mod policy;
pub mod router;
pub mod session;
pub mod testing;

pub use agent::{
	AgentChannel, AgentCommand, AgentConnection, AgentHost, AgentMessage, AgentSink, AttachRequest,
	SessionState, StateUpdate,
};
pub use client::{ClientId, ClientLink};
pub use dispatcher::DomainDispatcher;
pub use error::{Error, Result};
pub use handler::{
	DispatchOutcome, DomainHandler, HandlerFactory, MethodCall, Responder, SessionContext,
};
pub use pending::{PendingCall, PendingCallTable};
pub use policy::{MethodPolicy, RouterConfig};
pub use router::{
	Router, RouterEvent, RouterHandle, TargetEntry, TargetInfo, TargetKind, TargetRequest,
};
pub use session::{Phase, Session, SessionKey, SessionSpec};
