//! HTTP and WebSocket front end for the router.


use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use dt_protocol::WireFormat;
use dt_runtime::{AgentHost, ClientLink, Router, RouterHandle, TargetInfo, TargetKind};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::agent_link::{LinkEvent, WsAgentHost};
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
	router: RouterHandle,
	config: Arc<Config>,
	links: Arc<Mutex<AgentLinks>>,
}

impl AppState {
	pub fn new(router: RouterHandle, config: Config) -> Self {
		Self {
			router,
			config: Arc::new(config),
			links: Arc::new(Mutex::new(AgentLinks::default())),
		}
	}
}

/// Outcome of an agent connecting for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStart {
	/// First agent for the target; it must be registered.
	New(u64),
	/// Replaces an agent that dropped within the grace period.
	Reconnect(u64),
	/// Another agent is already serving the target.
	Busy,
}

/// Which targets currently have, or recently had, an agent link.
///
/// Each link gets an epoch so that a grace timer started by one link cannot
/// tear down the target after a newer link took over.
#[derive(Debug, Default)]
pub struct AgentLinks {
	entries: HashMap<String, LinkEntry>,
	next_epoch: u64,
}

#[derive(Debug)]
struct LinkEntry {
	epoch: u64,
	connected: bool,
}

impl AgentLinks {
	pub fn connect(&mut self, target_id: &str) -> LinkStart {
		self.next_epoch += 1;
		let epoch = self.next_epoch;
		match self.entries.get_mut(target_id) {
			Some(entry) if entry.connected => LinkStart::Busy,
			Some(entry) => {
				entry.epoch = epoch;
				entry.connected = true;
				LinkStart::Reconnect(epoch)
			}
			None => {
				self.entries.insert(
					target_id.to_string(),
					LinkEntry {
						epoch,
						connected: true,
					},
				);
				LinkStart::New(epoch)
			}
		}
	}

	/// Marks the link gone. False when a newer link owns the target.
	pub fn disconnect(&mut self, target_id: &str, epoch: u64) -> bool {
		match self.entries.get_mut(target_id) {
			Some(entry) if entry.epoch == epoch => {
				entry.connected = false;
				true
			}
			_ => false,
		}
	}

	/// Forgets a target whose grace period ran out without a reconnect.
	pub fn expire(&mut self, target_id: &str, epoch: u64) -> bool {
		let stale = self
			.entries
			.get(target_id)
			.is_some_and(|entry| entry.epoch == epoch && !entry.connected);
		if stale {
			self.entries.remove(target_id);
		}
		stale
	}

	pub fn remove(&mut self, target_id: &str) {
		self.entries.remove(target_id);
	}
}

pub fn app(state: AppState) -> axum::Router {
	axum::Router::new()
		.route("/json/version", get(version))
		.route("/json", get(list_targets))
		.route("/json/list", get(list_targets))
		.route("/devtools/browser", get(browser_socket))
		.route("/devtools/page/{target_id}", get(page_socket))
		.route("/agent/{target_id}", get(agent_socket))
		.with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
	let addr = config.addr()?;
	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind server to {addr}"))?;
	info!(target = "dtmux", %addr, "listening");
	serve(listener, config, async {
		let _ = tokio::signal::ctrl_c().await;
		info!(target = "dtmux", "received Ctrl+C, shutting down");
	})
	.await
}

/// Runs the router and serves `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, config: Config, shutdown: F) -> Result<()>
where
	F: Future<Output = ()> + Send + 'static,
{
	let (router, events) = Router::new(config.router.clone());
	let (handle, task) = router.spawn(events);
	handle
		.register_target(
			TargetInfo::new(config.browser_target_id.clone(), TargetKind::Browser).with_title("Browser"),
			None,
		)
		.await
		.context("Failed to register browser target")?;

	let stop = handle.clone();
	let state = AppState::new(handle, config);
	axum::serve(listener, app(state).into_make_service())
		.with_graceful_shutdown(async move {
			shutdown.await;
			// Closing the router closes every client link and agent session.
			let _ = stop.shutdown();
		})
		.await
		.context("Server error")?;
	task.await.context("Router task failed")?;
	Ok(())
}

fn ws_base(headers: &HeaderMap, config: &Config) -> String {
	let host = headers
		.get(header::HOST)
		.and_then(|value| value.to_str().ok())
		.map(str::to_string)
		.unwrap_or_else(|| format!("{}:{}", config.host, config.port));
	format!("ws://{host}")
}

async fn version(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
	let router = &state.config.router;
	Json(json!({
		"Browser": router.product,
		"Protocol-Version": router.protocol_version,
		"User-Agent": router.user_agent,
		"webSocketDebuggerUrl": format!("{}/devtools/browser", ws_base(&headers, &state.config)),
	}))
}

async fn list_targets(State(state): State<AppState>, headers: HeaderMap) -> Response {
	let targets = match state.router.targets().await {
		Ok(targets) => targets,
		Err(err) => return (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
	};
	let base = ws_base(&headers, &state.config);
	let list: Vec<Value> = targets
		.iter()
		.filter(|entry| entry.info.kind != TargetKind::Browser)
		.map(|entry| {
			let info = &entry.info;
			json!({
				"id": info.id,
				"type": info.kind.as_str(),
				"title": info.title,
				"url": info.url,
				"attached": entry.attached,
				"webSocketDebuggerUrl": format!("{base}/devtools/page/{}", info.id),
			})
		})
		.collect();
	Json(list).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct ClientQuery {
	#[serde(default)]
	format: WireFormat,
}

async fn browser_socket(
	ws: WebSocketUpgrade,
	Query(query): Query<ClientQuery>,
	State(state): State<AppState>,
) -> Response {
	let target_id = state.config.browser_target_id.clone();
	ws.on_upgrade(move |socket| handle_client_socket(socket, state, target_id, query.format))
}

async fn page_socket(
	Path(target_id): Path<String>,
	ws: WebSocketUpgrade,
	Query(query): Query<ClientQuery>,
	State(state): State<AppState>,
) -> Response {
	ws.on_upgrade(move |socket| handle_client_socket(socket, state, target_id, query.format))
}

fn to_ws_message(format: WireFormat, bytes: Vec<u8>) -> Message {
	match format {
		WireFormat::Json => Message::Text(String::from_utf8_lossy(&bytes).into_owned().into()),
		WireFormat::Binary => Message::Binary(bytes.into()),
	}
}

async fn handle_client_socket(
	mut socket: WebSocket,
	state: AppState,
	target_id: String,
	format: WireFormat,
) {
	let (link, rx) = ClientLink::channel(format);
	let client = match state.router.connect_client(&target_id, link).await {
		Ok(client) => client,
		Err(err) => {
			warn!(target = "dtmux", target_id, error = %err, "rejecting client");
			let _ = socket.send(Message::Close(None)).await;
			return;
		}
	};
	info!(target = "dtmux", %client, target_id, %format, "client connected");

	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	// Ends when the router drops the link: session disposed or shutdown.
	let mut send_task = tokio::spawn(async move {
		while let Some(bytes) = rx_stream.next().await {
			if ws_tx.send(to_ws_message(format, bytes)).await.is_err() {
				return;
			}
		}
		let _ = ws_tx.send(Message::Close(None)).await;
	});

	let router = state.router.clone();
	let mut recv_task = tokio::spawn(async move {
		while let Some(msg) = ws_rx.next().await {
			let bytes = match msg {
				Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
				Ok(Message::Binary(bytes)) => bytes.to_vec(),
				Ok(Message::Close(_)) => break,
				Ok(_) => continue,
				Err(err) => {
					warn!(target = "dtmux", %client, error = %err, "client websocket error");
					break;
				}
			};
			if router.client_message(client, bytes).is_err() {
				break;
			}
		}
	});

	tokio::select! {
		_ = &mut send_task => recv_task.abort(),
		_ = &mut recv_task => send_task.abort(),
	}

	let _ = state.router.disconnect_client(client);
	info!(target = "dtmux", %client, "client disconnected");
}

#[derive(Debug, Default, Deserialize)]
struct AgentQuery {
	kind: Option<TargetKind>,
	parent: Option<String>,
	url: Option<String>,
	title: Option<String>,
}

impl AgentQuery {
	fn into_info(self, target_id: String) -> TargetInfo {
		let mut info = TargetInfo::new(target_id, self.kind.unwrap_or(TargetKind::Page));
		if let Some(url) = self.url {
			info = info.with_url(url);
		}
		if let Some(title) = self.title {
			info = info.with_title(title);
		}
		if let Some(parent) = self.parent {
			info = info.with_parent(parent);
		}
		info
	}
}

async fn agent_socket(
	Path(target_id): Path<String>,
	ws: WebSocketUpgrade,
	Query(query): Query<AgentQuery>,
	State(state): State<AppState>,
) -> Response {
	if query.kind == Some(TargetKind::Browser) {
		return (StatusCode::BAD_REQUEST, "browser targets are served locally").into_response();
	}
	let info = query.into_info(target_id);
	ws.on_upgrade(move |socket| handle_agent_socket(socket, state, info))
}

async fn handle_agent_socket(mut socket: WebSocket, state: AppState, info: TargetInfo) {
	let target_id = info.id.clone();
	let (host, mut queues) = WsAgentHost::new(&target_id);
	let shared: Arc<dyn AgentHost> = Arc::new(host.clone());

	let start = state.links.lock().connect(&target_id);
	let epoch = match start {
		LinkStart::Busy => {
			warn!(target = "dtmux", target_id, "target already has an agent; refusing link");
			let _ = socket.send(Message::Close(None)).await;
			return;
		}
		LinkStart::New(epoch) => {
			if let Err(err) = state.router.register_target(info, Some(shared)).await {
				warn!(target = "dtmux", target_id, error = %err, "target registration failed");
				state.links.lock().remove(&target_id);
				let _ = socket.send(Message::Close(None)).await;
				return;
			}
			epoch
		}
		LinkStart::Reconnect(epoch) => {
			info!(target = "dtmux", target_id, "agent reconnected");
			let _ = state.router.commit_navigation(&target_id, Some(shared));
			epoch
		}
	};
	info!(target = "dtmux", target_id, epoch, "agent connected");

	let (mut ws_tx, mut ws_rx) = socket.split();
	let send_task = tokio::spawn(async move {
		while let Some(frame) = queues.next().await {
			if ws_tx.send(Message::Text(frame.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => match host.handle_frame(&text) {
				Ok(Some(event)) => apply_link_event(&state.router, &target_id, event),
				Ok(None) => {}
				Err(err) => warn!(target = "dtmux", target_id, error = %err, "failed handling agent frame"),
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "dtmux", target_id, error = %err, "agent websocket error");
				break;
			}
		}
	}

	host.close();
	send_task.abort();
	info!(target = "dtmux", target_id, "agent disconnected");

	{
		// Posted under the lock so a reconnect's commit always queues after it.
		let mut links = state.links.lock();
		if !links.disconnect(&target_id, epoch) {
			return;
		}
		let _ = state.router.begin_navigation(&target_id);
	}
	let grace = state.config.reconnect_grace();
	tokio::spawn(async move {
		tokio::time::sleep(grace).await;
		let mut links = state.links.lock();
		if links.expire(&target_id, epoch) {
			debug!(target = "dtmux", target_id, "agent did not return; destroying target");
			let _ = state.router.destroy_target(&target_id);
		}
	});
}

fn apply_link_event(router: &RouterHandle, target_id: &str, event: LinkEvent) {
	debug!(target = "dtmux", target_id, ?event, "agent lifecycle event");
	let posted = match event {
		LinkEvent::Navigating => router.begin_navigation(target_id),
		LinkEvent::Committed => router.commit_navigation(target_id, None),
		LinkEvent::Crashed => router.agent_crashed(target_id),
	};
	if let Err(err) = posted {
		warn!(target = "dtmux", target_id, error = %err, "router rejected lifecycle event");
	}
}
