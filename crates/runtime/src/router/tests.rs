use dt_protocol::{ErrorCode, TARGET_CLOSED_MESSAGE, TARGET_CRASHED_MESSAGE, WireFormat, is_binary};
use serde_json::json;

use super::*;
use crate::handler::{DispatchOutcome, DomainHandler, MethodCall};
use crate::session::Phase;
use crate::testing::{ClientOutput, RecordingAgentHost, client_link, pump};

struct Harness {
	router: Router,
	events: mpsc::UnboundedReceiver<RouterEvent>,
	host: RecordingAgentHost,
}

fn harness() -> Harness {
	let (router, events) = Router::new(RouterConfig::default());
	Harness {
		router,
		events,
		host: RecordingAgentHost::new(),
	}
}

impl Harness {
	fn page(&mut self, id: &str) {
		self.router
			.register_target(TargetInfo::new(id, TargetKind::Page), Some(self.host.shared()))
			.unwrap();
	}

	fn frame(&mut self, id: &str, parent: &str) {
		self.router
			.register_target(
				TargetInfo::new(id, TargetKind::Frame).with_parent(parent),
				Some(self.host.shared()),
			)
			.unwrap();
	}

	fn browser(&mut self) {
		self.router
			.register_target(TargetInfo::new("browser", TargetKind::Browser), None)
			.unwrap();
	}

	fn connect(&mut self, target_id: &str) -> (ClientId, ClientOutput) {
		let (link, output) = client_link(WireFormat::Json);
		let client = self.router.connect_client(target_id, link).unwrap();
		(client, output)
	}

	fn root(&self, client: ClientId) -> SessionKey {
		self.router.client_session(client).unwrap().key()
	}

	fn send(&mut self, client: ClientId, message: Value) {
		let bytes = serde_json::to_vec(&message).unwrap();
		self.router.client_message(client, &bytes).unwrap();
		self.pump();
	}

	fn pump(&mut self) {
		pump(&mut self.router, &mut self.events);
	}

	fn pending(&self, key: SessionKey) -> Vec<CallId> {
		self.router
			.session(key)
			.unwrap()
			.pending()
			.iter()
			.map(|call| call.call_id)
			.collect()
	}
}

#[test]
fn test_suspended_call_is_replayed_then_child_routing() {
	let mut h = harness();
	h.page("page-1");
	h.frame("frame-1", "page-1");
	let (client, mut output) = h.connect("page-1");
	let root = h.root(client);
	let child = h.router.attach_child(root, "child-1".to_string(), "frame-1").unwrap();

	h.router.begin_navigation("page-1").unwrap();
	h.send(client, json!({"id": 5, "method": "Target.foo"}));
	assert!(h.host.sent().iter().all(|c| c.call_id != 5));
	assert_eq!(h.pending(root), vec![5]);

	h.router.commit_navigation("page-1", None).unwrap();
	let forwarded: Vec<_> = h.host.sent().into_iter().filter(|c| c.call_id == 5).collect();
	assert_eq!(forwarded.len(), 1);
	assert_eq!(forwarded[0].session_id, "");

	h.host.respond("", 5, json!({}));
	h.pump();
	assert_eq!(output.messages(), vec![json!({"id": 5, "result": {}})]);
	assert!(h.pending(root).is_empty());

	let tagged = json!({"id": 6, "method": "Target.bar", "sessionId": "child-1"});
	h.send(client, tagged.clone());
	let last = h.host.sent().pop().unwrap();
	assert_eq!(last.session_id, "child-1");
	assert_eq!(last.message, tagged);
	assert!(h.pending(root).is_empty());
	assert_eq!(h.pending(child), vec![6]);
}

#[test]
fn test_unknown_child_is_dropped_without_touching_siblings() {
	let mut h = harness();
	h.page("page-1");
	h.frame("frame-a", "page-1");
	h.frame("frame-b", "page-1");
	let (client, mut output) = h.connect("page-1");
	let root = h.root(client);
	let a = h.router.attach_child(root, "A".to_string(), "frame-a").unwrap();
	let b = h.router.attach_child(root, "B".to_string(), "frame-b").unwrap();
	h.host.take_sent();

	h.send(client, json!({"id": 1, "method": "DOM.enable", "sessionId": "zzz"}));
	assert!(h.host.sent().is_empty());
	assert!(output.messages().is_empty());

	h.send(client, json!({"id": 2, "method": "DOM.enable", "sessionId": "A"}));
	assert_eq!(h.pending(a), vec![2]);
	assert!(h.pending(b).is_empty());
	assert!(h.pending(root).is_empty());
}

#[test]
fn test_child_responses_carry_session_id() {
	let mut h = harness();
	h.page("page-1");
	h.frame("frame-1", "page-1");
	let (client, mut output) = h.connect("page-1");
	let root = h.root(client);
	h.router.attach_child(root, "child-1".to_string(), "frame-1").unwrap();

	h.send(client, json!({"id": 3, "method": "Runtime.enable", "sessionId": "child-1"}));
	h.host.respond("child-1", 3, json!({}));
	h.host.notify("child-1", "Runtime.executionContextCreated", json!({"context": {"id": 1}}));
	h.pump();
	assert_eq!(
		output.messages(),
		vec![
			json!({"id": 3, "result": {}, "sessionId": "child-1"}),
			json!({"method": "Runtime.executionContextCreated", "params": {"context": {"id": 1}}, "sessionId": "child-1"}),
		]
	);
}

#[test]
fn test_destroying_sub_target_detaches_child() {
	let mut h = harness();
	h.page("page-1");
	h.frame("frame-1", "page-1");
	let (client, mut output) = h.connect("page-1");
	let root = h.root(client);
	h.router.attach_child(root, "child-1".to_string(), "frame-1").unwrap();
	h.send(client, json!({"id": 1, "method": "DOM.getDocument", "sessionId": "child-1"}));

	h.router.destroy_target("frame-1").unwrap();
	let messages = output.messages();
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0]["id"], 1);
	assert_eq!(messages[0]["sessionId"], "child-1");
	assert_eq!(messages[0]["error"]["message"], TARGET_CLOSED_MESSAGE);
	assert_eq!(
		messages[1],
		json!({"method": "Target.detachedFromTarget", "params": {"sessionId": "child-1", "targetId": "frame-1"}})
	);
	assert_eq!(h.router.session(root).unwrap().child("child-1"), None);
	assert_eq!(h.router.session_count(), 1);
}

#[test]
fn test_destroying_target_closes_root_session() {
	let mut h = harness();
	h.page("page-1");
	let (client, mut output) = h.connect("page-1");
	h.send(client, json!({"id": 1, "method": "Page.navigate", "params": {"url": "about:blank"}}));

	h.router.destroy_target("page-1").unwrap();
	let messages = output.messages();
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0]["error"]["message"], TARGET_CLOSED_MESSAGE);
	assert_eq!(messages[1]["method"], "Inspector.detached");
	assert!(matches!(
		h.router.client_message(client, b"{}"),
		Err(Error::ClientNotFound(_))
	));
	assert!(matches!(h.router.destroy_target("page-1"), Err(Error::TargetNotFound(_))));
}

#[test]
fn test_disconnect_disposes_children() {
	let mut h = harness();
	h.page("page-1");
	h.frame("frame-1", "page-1");
	let (client, _output) = h.connect("page-1");
	let root = h.root(client);
	h.router.attach_child(root, "child-1".to_string(), "frame-1").unwrap();
	assert_eq!(h.router.session_count(), 2);

	h.router.disconnect_client(client).unwrap();
	assert_eq!(h.router.session_count(), 0);
	assert!(h.router.target_sessions("page-1").is_empty());
	assert!(h.router.target_sessions("frame-1").is_empty());
	assert_eq!(h.host.detaches(), 2);
	assert!(h.router.disconnect_client(client).is_err());
}

#[test]
fn test_attach_child_rules() {
	let mut h = harness();
	h.page("page-1");
	h.frame("frame-1", "page-1");
	let (client, _output) = h.connect("page-1");
	let root = h.root(client);
	let child = h.router.attach_child(root, "A".to_string(), "frame-1").unwrap();

	assert!(matches!(
		h.router.attach_child(root, "A".to_string(), "frame-1"),
		Err(Error::DuplicateSession(_))
	));
	assert!(matches!(
		h.router.attach_child(child, "B".to_string(), "frame-1"),
		Err(Error::NotRootSession(_))
	));
	assert!(matches!(
		h.router.attach_child(root, "C".to_string(), "missing"),
		Err(Error::TargetNotFound(_))
	));
	assert!(matches!(
		h.router.detach_child(root, "missing"),
		Err(Error::ChildNotFound(_))
	));
	assert!(matches!(
		h.router.register_target(TargetInfo::new("page-1", TargetKind::Page), None),
		Err(Error::DuplicateTarget(_))
	));
}

#[test]
fn test_browser_session_is_local_only() {
	let mut h = harness();
	h.browser();
	let (client, mut output) = h.connect("browser");

	h.send(client, json!({"id": 1, "method": "Browser.getVersion"}));
	h.send(client, json!({"id": 2, "method": "Page.enable"}));
	let messages = output.messages();
	assert_eq!(messages[0]["id"], 1);
	assert_eq!(messages[0]["result"]["protocolVersion"], "1.3");
	assert_eq!(messages[1]["id"], 2);
	assert_eq!(messages[1]["error"]["code"], ErrorCode::METHOD_NOT_FOUND);
	assert!(h.host.sent().is_empty());
}

#[test]
fn test_attach_and_detach_through_target_domain() {
	let mut h = harness();
	h.browser();
	h.page("page-1");
	let (client, mut output) = h.connect("browser");

	h.send(
		client,
		json!({"id": 1, "method": "Target.attachToTarget", "params": {"targetId": "page-1", "flatten": true}}),
	);
	let messages = output.messages();
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0]["method"], "Target.attachedToTarget");
	assert_eq!(messages[0]["params"]["targetInfo"]["targetId"], "page-1");
	let session_id = messages[1]["result"]["sessionId"].as_str().unwrap().to_string();
	assert_eq!(messages[0]["params"]["sessionId"], session_id.as_str());
	assert_eq!(session_id.len(), 32);
	assert!(session_id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

	h.send(client, json!({"id": 2, "method": "Page.enable", "sessionId": session_id}));
	let sent = h.host.sent().pop().unwrap();
	assert_eq!(sent.session_id, session_id);
	assert_eq!(sent.call_id, 2);

	h.send(
		client,
		json!({"id": 3, "method": "Target.detachFromTarget", "params": {"sessionId": session_id}}),
	);
	let messages = output.messages();
	assert_eq!(messages.len(), 3);
	assert_eq!(messages[0]["id"], 2);
	assert_eq!(messages[0]["sessionId"], session_id.as_str());
	assert_eq!(messages[1]["method"], "Target.detachedFromTarget");
	assert_eq!(messages[2], json!({"id": 3, "result": {}}));

	h.send(
		client,
		json!({"id": 4, "method": "Target.detachFromTarget", "params": {"sessionId": session_id}}),
	);
	assert_eq!(output.messages()[0]["error"]["code"], ErrorCode::INVALID_PARAMS);
}

#[test]
fn test_attach_to_unknown_target_fails() {
	let mut h = harness();
	h.browser();
	let (client, mut output) = h.connect("browser");
	h.send(
		client,
		json!({"id": 1, "method": "Target.attachToTarget", "params": {"targetId": "nope"}}),
	);
	h.send(client, json!({"id": 2, "method": "Target.attachToTarget", "params": {}}));
	let messages = output.messages();
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0]["error"]["message"], "No target with given id found");
	assert_eq!(messages[1]["error"]["code"], ErrorCode::INVALID_PARAMS);
}

#[test]
fn test_auto_attach_picks_up_sub_targets() {
	let mut h = harness();
	h.page("page-1");
	h.frame("frame-1", "page-1");
	let (client, mut output) = h.connect("page-1");

	h.send(
		client,
		json!({"id": 1, "method": "Target.setAutoAttach", "params": {"autoAttach": true, "waitForDebuggerOnStart": false}}),
	);
	let messages = output.messages();
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0]["method"], "Target.attachedToTarget");
	assert_eq!(messages[0]["params"]["targetInfo"]["type"], "iframe");
	assert_eq!(messages[0]["params"]["targetInfo"]["parentFrameId"], "page-1");
	assert_eq!(messages[1], json!({"id": 1, "result": {}}));

	h.frame("frame-2", "page-1");
	let messages = output.messages();
	assert_eq!(messages.len(), 1);
	assert_eq!(messages[0]["params"]["targetInfo"]["targetId"], "frame-2");
	let root = h.root(client);
	assert_eq!(h.router.session(root).unwrap().children().count(), 2);

	// Enabling again does not attach twice.
	h.send(
		client,
		json!({"id": 2, "method": "Target.setAutoAttach", "params": {"autoAttach": true}}),
	);
	assert_eq!(output.messages(), vec![json!({"id": 2, "result": {}})]);

	h.page("page-2");
	assert!(output.messages().is_empty());
}

#[test]
fn test_browser_auto_attach_covers_pages() {
	let mut h = harness();
	h.browser();
	h.page("page-1");
	let (client, mut output) = h.connect("browser");
	h.send(
		client,
		json!({"id": 1, "method": "Target.setAutoAttach", "params": {"autoAttach": true}}),
	);
	h.page("page-2");
	h.frame("frame-1", "page-1");

	let attached: Vec<_> = output
		.messages()
		.into_iter()
		.filter(|m| m["method"] == "Target.attachedToTarget")
		.map(|m| m["params"]["targetInfo"]["targetId"].as_str().unwrap().to_string())
		.collect();
	assert_eq!(attached, vec!["page-1", "page-2"]);
}

#[test]
fn test_get_targets_reports_attachment() {
	let mut h = harness();
	h.browser();
	h.page("page-1");
	h.page("page-2");
	let (client, mut output) = h.connect("browser");
	let _page_client = h.connect("page-2");

	h.send(client, json!({"id": 1, "method": "Target.getTargets"}));
	let infos = output.messages()[0]["result"]["targetInfos"].clone();
	let summary: Vec<_> = infos
		.as_array()
		.unwrap()
		.iter()
		.map(|info| (info["targetId"].as_str().unwrap().to_string(), info["attached"].as_bool().unwrap()))
		.collect();
	assert_eq!(
		summary,
		vec![
			("browser".to_string(), true),
			("page-1".to_string(), false),
			("page-2".to_string(), true),
		]
	);

	h.send(client, json!({"id": 2, "method": "Target.getTargetInfo"}));
	assert_eq!(output.messages()[0]["result"]["targetInfo"]["type"], "browser");
}

#[test]
fn test_navigation_suspends_every_session_of_target() {
	let mut h = harness();
	h.page("page-1");
	let (first, _a) = h.connect("page-1");
	let (second, _b) = h.connect("page-1");

	h.router.begin_navigation("page-1").unwrap();
	for client in [first, second] {
		assert_eq!(h.router.client_session(client).unwrap().phase(), Phase::Suspended);
	}
	h.send(first, json!({"id": 1, "method": "Page.enable"}));
	h.send(second, json!({"id": 1, "method": "Page.enable"}));

	let next = RecordingAgentHost::new();
	h.router.commit_navigation("page-1", Some(next.shared())).unwrap();
	assert_eq!(next.attaches().len(), 2);
	assert_eq!(next.sent_ids(), vec![1, 1]);
	for client in [first, second] {
		assert_eq!(h.router.client_session(client).unwrap().phase(), Phase::Active);
	}

	// Clients joining mid-navigation start suspended.
	h.router.begin_navigation("page-1").unwrap();
	let (late, _c) = h.connect("page-1");
	assert_eq!(h.router.client_session(late).unwrap().phase(), Phase::Suspended);
}

#[test]
fn test_commit_without_begin_does_not_rerun_script_calls() {
	let mut h = harness();
	h.page("page-1");
	let (client, mut output) = h.connect("page-1");
	h.send(client, json!({"id": 1, "method": "Runtime.evaluate", "params": {"expression": "1"}}));
	h.send(client, json!({"id": 2, "method": "Page.enable"}));
	assert_eq!(h.host.sent_ids(), vec![1, 2]);

	h.router.commit_navigation("page-1", None).unwrap();
	assert_eq!(h.host.attaches().len(), 2);
	assert_eq!(h.host.sent_ids(), vec![1, 2, 2]);

	let messages = output.messages();
	assert_eq!(messages.len(), 1);
	assert_eq!(messages[0]["id"], 1);
	assert_eq!(messages[0]["error"]["message"], TARGET_CLOSED_MESSAGE);
	assert_eq!(h.pending(h.root(client)), vec![2]);
	assert_eq!(h.router.client_session(client).unwrap().phase(), Phase::Active);
}

#[test]
fn test_agent_crash_notifies_root() {
	let mut h = harness();
	h.page("page-1");
	let (client, mut output) = h.connect("page-1");
	h.send(client, json!({"id": 1, "method": "Runtime.evaluate", "params": {"expression": "1"}}));
	h.send(client, json!({"id": 2, "method": "Page.reload"}));

	h.router.agent_crashed("page-1").unwrap();
	let messages = output.messages();
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0]["id"], 1);
	assert_eq!(messages[0]["error"]["message"], TARGET_CRASHED_MESSAGE);
	assert_eq!(messages[1]["method"], "Inspector.targetCrashed");
	assert_eq!(h.pending(h.root(client)), vec![2]);
}

#[test]
fn test_binary_client() {
	let mut h = harness();
	h.page("page-1");
	let (link, mut output) = client_link(WireFormat::Binary);
	let client = h.router.connect_client("page-1", link).unwrap();

	let command = WireFormat::Binary
		.encode(&json!({"id": 1, "method": "Page.enable"}))
		.unwrap();
	h.router.client_message(client, &command).unwrap();
	assert_eq!(h.host.sent_ids(), vec![1]);

	h.host.respond("", 1, json!({}));
	h.pump();
	let frames = output.frames();
	assert_eq!(frames.len(), 1);
	assert!(is_binary(&frames[0]));

	// JSON text on a binary link cannot be decoded and is dropped.
	h.router.client_message(client, br#"{"id":2,"method":"Page.enable"}"#).unwrap();
	assert_eq!(h.host.sent_ids(), vec![1]);
}

#[test]
fn test_undecodable_input_is_dropped() {
	let mut h = harness();
	h.page("page-1");
	let (client, mut output) = h.connect("page-1");
	h.router.client_message(client, b"{not json").unwrap();
	assert!(output.messages().is_empty());
	assert!(h.host.sent().is_empty());
}

#[test]
fn test_extra_handlers_from_factory() {
	struct Echo;

	impl DomainHandler for Echo {
		fn name(&self) -> &str {
			"Echo"
		}

		fn methods(&self) -> Vec<String> {
			vec!["Echo.say".to_string()]
		}

		fn dispatch(&mut self, call: MethodCall, _responder: Responder) -> DispatchOutcome {
			DispatchOutcome::Done(Ok(Value::Object(call.params)))
		}
	}

	let (router, events) = Router::new(RouterConfig::default());
	let factory = |_: &SessionContext| -> Vec<Box<dyn DomainHandler>> { vec![Box::new(Echo)] };
	let mut h = Harness {
		router: router.with_handlers(Arc::new(factory)),
		events,
		host: RecordingAgentHost::new(),
	};
	h.page("page-1");
	let (client, mut output) = h.connect("page-1");
	h.send(client, json!({"id": 1, "method": "Echo.say", "params": {"text": "hi"}}));
	assert_eq!(output.messages(), vec![json!({"id": 1, "result": {"text": "hi"}})]);
	assert!(h.host.sent().is_empty());
}
