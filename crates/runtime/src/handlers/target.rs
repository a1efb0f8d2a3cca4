use dt_protocol::ProtocolError;

use crate::handler::{DispatchOutcome, DomainHandler, MethodCall, Responder, SessionContext};
use crate::router::{RouterEvent, RouterHandle, TargetRequest};

const METHODS: &[&str] = &[
	"Target.attachToTarget",
	"Target.detachFromTarget",
	"Target.getTargetInfo",
	"Target.getTargets",
	"Target.setAutoAttach",
];

/// Validated parameters of a Target command.
enum Params {
	GetTargets,
	GetTargetInfo(Option<String>),
	AttachToTarget(String),
	DetachFromTarget(String),
	SetAutoAttach(bool),
}

impl Params {
	fn parse(call: &MethodCall) -> Result<Self, ProtocolError> {
		Ok(match call.method.as_str() {
			"Target.getTargets" => Params::GetTargets,
			"Target.getTargetInfo" => Params::GetTargetInfo(call.str_param("targetId")?.map(str::to_string)),
			"Target.attachToTarget" => Params::AttachToTarget(call.required_str("targetId")?.to_string()),
			"Target.detachFromTarget" => Params::DetachFromTarget(call.required_str("sessionId")?.to_string()),
			"Target.setAutoAttach" => Params::SetAutoAttach(call.bool_param("autoAttach")?.ok_or_else(|| {
				ProtocolError::invalid_params("autoAttach: boolean value expected")
			})?),
			other => return Err(ProtocolError::method_not_found(other)),
		})
	}

	fn into_request(self, responder: Responder) -> TargetRequest {
		match self {
			Params::GetTargets => TargetRequest::GetTargets { responder },
			Params::GetTargetInfo(target_id) => TargetRequest::GetTargetInfo {
				target_id,
				responder,
			},
			Params::AttachToTarget(target_id) => TargetRequest::AttachToTarget {
				target_id,
				responder,
			},
			Params::DetachFromTarget(session_id) => TargetRequest::DetachFromTarget {
				session_id,
				responder,
			},
			Params::SetAutoAttach(auto_attach) => TargetRequest::SetAutoAttach {
				auto_attach,
				responder,
			},
		}
	}
}

/// `Target` domain. Requests need the target registry, so the router answers
/// them after a round trip through its queue.
pub struct TargetHandler {
	router: RouterHandle,
}

impl TargetHandler {
	pub fn new(context: &SessionContext) -> Self {
		Self {
			router: context.router.clone(),
		}
	}
}

impl DomainHandler for TargetHandler {
	fn name(&self) -> &str {
		"Target"
	}

	fn methods(&self) -> Vec<String> {
		METHODS.iter().map(|m| m.to_string()).collect()
	}

	fn dispatch(&mut self, call: MethodCall, responder: Responder) -> DispatchOutcome {
		let params = match Params::parse(&call) {
			Ok(params) => params,
			Err(err) => return DispatchOutcome::Done(Err(err)),
		};
		match self.router.post(RouterEvent::Target(params.into_request(responder))) {
			Ok(()) => DispatchOutcome::Deferred,
			Err(_) => DispatchOutcome::Done(Err(ProtocolError::internal("router unavailable"))),
		}
	}
}
