//! The router running as a task, driven only through its handle.

use std::time::Duration;

use dt_protocol::WireFormat;
use dt_runtime::testing::RecordingAgentHost;
use dt_runtime::{ClientLink, Error, Router, RouterConfig, TargetInfo, TargetKind};
use serde_json::{Value, json};
use tokio::time::timeout;

async fn next_message(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) -> Value {
	let frame = timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("timed out waiting for client frame")
		.expect("client link closed");
	serde_json::from_slice(&frame).unwrap()
}

#[tokio::test]
async fn test_command_round_trip_through_handle() {
	let (router, events) = Router::new(RouterConfig::default());
	let (handle, task) = router.spawn(events);
	let host = RecordingAgentHost::new();

	handle
		.register_target(
			TargetInfo::new("page-1", TargetKind::Page).with_url("about:blank"),
			Some(host.shared()),
		)
		.await
		.unwrap();
	let (link, mut rx) = ClientLink::channel(WireFormat::Json);
	let client = handle.connect_client("page-1", link).await.unwrap();

	handle
		.client_message(client, br#"{"id":1,"method":"Page.enable"}"#.to_vec())
		.unwrap();
	// The queue is ordered, so a round trip means the command was handled.
	let targets = handle.targets().await.unwrap();
	assert!(targets[0].attached);
	assert_eq!(host.sent_ids(), vec![1]);

	assert!(host.respond("", 1, json!({})));
	assert_eq!(next_message(&mut rx).await, json!({"id": 1, "result": {}}));

	handle.shutdown().unwrap();
	task.await.unwrap();
	assert!(matches!(handle.targets().await, Err(Error::RouterClosed)));
	assert!(!host.respond("", 1, json!({})));
}

#[tokio::test]
async fn test_registration_errors_reach_caller() {
	let (router, events) = Router::new(RouterConfig::default());
	let (handle, _task) = router.spawn(events);

	handle
		.register_target(TargetInfo::new("page-1", TargetKind::Page), None)
		.await
		.unwrap();
	let duplicate = handle
		.register_target(TargetInfo::new("page-1", TargetKind::Page), None)
		.await;
	assert!(matches!(duplicate, Err(Error::DuplicateTarget(_))));

	let (link, _rx) = ClientLink::channel(WireFormat::Json);
	let missing = handle.connect_client("page-2", link).await;
	assert!(matches!(missing, Err(Error::TargetNotFound(_))));
}

#[tokio::test]
async fn test_disconnect_closes_client_link() {
	let (router, events) = Router::new(RouterConfig::default());
	let (handle, _task) = router.spawn(events);
	let host = RecordingAgentHost::new();
	handle
		.register_target(TargetInfo::new("page-1", TargetKind::Page), Some(host.shared()))
		.await
		.unwrap();

	let (link, mut rx) = ClientLink::channel(WireFormat::Json);
	let client = handle.connect_client("page-1", link).await.unwrap();
	handle
		.client_message(client, br#"{"id":7,"method":"Network.enable"}"#.to_vec())
		.unwrap();
	handle.disconnect_client(client).unwrap();

	let message = next_message(&mut rx).await;
	assert_eq!(message["id"], 7);
	assert_eq!(message["error"]["code"], -32000);
	let closed = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
	assert!(closed.is_none());
	assert_eq!(host.detaches(), 1);
}

#[tokio::test]
async fn test_navigation_through_handle() {
	let (router, events) = Router::new(RouterConfig::default());
	let (handle, _task) = router.spawn(events);
	let first = RecordingAgentHost::new();
	handle
		.register_target(TargetInfo::new("page-1", TargetKind::Page), Some(first.shared()))
		.await
		.unwrap();
	let (link, mut rx) = ClientLink::channel(WireFormat::Json);
	let client = handle.connect_client("page-1", link).await.unwrap();

	handle.begin_navigation("page-1").unwrap();
	for (id, method) in [(1, "Page.enable"), (2, "Runtime.evaluate"), (3, "Network.enable")] {
		let command = serde_json::to_vec(&json!({"id": id, "method": method})).unwrap();
		handle.client_message(client, command).unwrap();
	}
	let second = RecordingAgentHost::new();
	handle.commit_navigation("page-1", Some(second.shared())).unwrap();
	handle.targets().await.unwrap();

	assert!(first.sent().is_empty());
	assert_eq!(second.sent_ids(), vec![1, 3]);
	let failed = next_message(&mut rx).await;
	assert_eq!(failed["id"], 2);
	assert_eq!(failed["error"]["message"], "Inspected target navigated or closed");
}
