#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use roomsync_domain::{EventId, ResourceKind, RoomId, UserId};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::server::api::{Api, ApiError};
use crate::server::health::HealthState;
use crate::util::time::unix_ms_now;

type HttpBody = UnsyncBoxBody<Bytes, std::convert::Infallible>;

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppState {
	pub api: Api,
	pub health: HealthState,
	pub stream_poll_interval: Duration,
	pub stream_max_duration: Duration,
}

pub async fn run_http_server(bind: SocketAddr, state: AppState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				debug!(error = %err, "http connection closed with error");
			}
		});
	}
}

async fn handle(req: Request<Incoming>, state: AppState) -> Result<Response<HttpBody>, hyper::Error> {
	metrics::counter!("roomsync_server_requests_total").increment(1);

	let response = route(req, state).await.unwrap_or_else(|e| {
		let status = status_for(&e);
		if status.is_server_error() {
			metrics::counter!("roomsync_server_request_errors_total").increment(1);
			warn!(error = %e, "request failed");
			// Internal details stay in the log.
			return error_response(status, "internal error; try again");
		}
		error_response(status, &e.to_string())
	});

	Ok(response)
}

async fn route(req: Request<Incoming>, state: AppState) -> Result<Response<HttpBody>, ApiError> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	match (method.as_str(), path.as_str()) {
		("GET", "/healthz") => return Ok(text_response(StatusCode::OK, "ok")),
		("GET", "/readyz") => {
			return Ok(if state.health.is_ready() {
				text_response(StatusCode::OK, "ready")
			} else {
				text_response(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
			});
		}
		("POST", "/rooms") => return create_room(req, state).await,
		_ => {}
	}

	// Everything else lives under /rooms/{id}/{action}.
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
	let (room, action) = match segments.as_slice() {
		["rooms", room, action] => ((*room).to_string(), (*action).to_string()),
		_ => return Ok(error_response(StatusCode::NOT_FOUND, "no such route")),
	};
	let room = RoomId::new(room).map_err(|e| ApiError::BadRequest(format!("invalid room id: {e}")))?;

	let caller = caller_identity(&req)?;
	let query = req.uri().query().map(str::to_string);

	match (method.as_str(), action.as_str()) {
		("GET", "updates") => {
			let (since, extras) = parse_updates_query(query.as_deref());
			let updates = state.api.updates(&room, &caller, since, &extras, unix_ms_now()).await?;
			Ok(json_response(StatusCode::OK, &updates))
		}
		("GET", "stream") => {
			let (since, extras) = parse_updates_query(query.as_deref());
			Ok(stream_updates(state, room, caller, since, extras))
		}
		("POST", "join") => {
			let outcome = state.api.join(&room, &caller, unix_ms_now()).await?;
			Ok(json_response(
				StatusCode::OK,
				&json!({
					"already_present": outcome.already_present,
					"claimed_host": outcome.claimed_host,
				}),
			))
		}
		("POST", "leave") => {
			let outcome = state.api.leave(&room, &caller, unix_ms_now()).await?;
			Ok(json_response(
				StatusCode::OK,
				&json!({
					"was_present": outcome.was_present,
					"room_deleted": outcome.room_deleted,
					"host_transferred": outcome.host_transferred,
				}),
			))
		}
		("POST", "touch") => {
			let outcome = state.api.touch(&room, &caller, unix_ms_now()).await?;
			Ok(json_response(
				StatusCode::OK,
				&json!({ "returned_from_afk": outcome.returned_from_afk }),
			))
		}
		("POST", "afk") => {
			let body: AfkRequest = read_json(req).await?;
			let changed = state.api.set_afk(&room, &caller, body.afk, unix_ms_now()).await?;
			Ok(json_response(StatusCode::OK, &json!({ "changed": changed })))
		}
		("POST", "messages") => {
			let body: MessageRequest = read_json(req).await?;
			let mentions = parse_user_ids(&body.mentions)?;
			let event_id = state
				.api
				.send_message(&room, &caller, &body.text, &mentions, unix_ms_now())
				.await?;
			Ok(json_response(StatusCode::CREATED, &json!({ "event_id": event_id })))
		}
		("POST", "knock") => {
			let event_id = state.api.knock(&room, &caller, unix_ms_now()).await?;
			Ok(json_response(StatusCode::ACCEPTED, &json!({ "event_id": event_id })))
		}
		("POST", "whispers") => {
			let body: WhisperRequest = read_json(req).await?;
			let to = UserId::new(body.to).map_err(|e| ApiError::BadRequest(format!("invalid target user: {e}")))?;
			let event_id = state.api.whisper(&room, &caller, &to, unix_ms_now()).await?;
			Ok(json_response(StatusCode::CREATED, &json!({ "event_id": event_id })))
		}
		("POST", "settings") => {
			let body: SettingsRequest = read_json(req).await?;
			state
				.api
				.update_settings(&room, &caller, &body.name, body.permanent, unix_ms_now())
				.await?;
			Ok(json_response(StatusCode::OK, &json!({ "ok": true })))
		}
		_ => Ok(error_response(StatusCode::NOT_FOUND, "no such route")),
	}
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
	id: String,
	name: String,
	#[serde(default)]
	permanent: bool,
}

#[derive(Debug, Deserialize)]
struct AfkRequest {
	afk: bool,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
	text: String,
	#[serde(default)]
	mentions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperRequest {
	to: String,
}

#[derive(Debug, Deserialize)]
struct SettingsRequest {
	name: String,
	permanent: bool,
}

async fn create_room(req: Request<Incoming>, state: AppState) -> Result<Response<HttpBody>, ApiError> {
	let caller = caller_identity(&req)?;
	let body: CreateRoomRequest = read_json(req).await?;
	let room = RoomId::new(body.id).map_err(|e| ApiError::BadRequest(format!("invalid room id: {e}")))?;

	state
		.api
		.create_room(&room, &body.name, body.permanent, &caller, unix_ms_now())
		.await?;
	Ok(json_response(StatusCode::CREATED, &json!({ "room": room.as_str() })))
}

/// ndjson stream: the first line is sent immediately, later lines only
/// when the fetch is not quiet. The connection ends after the configured
/// bound; clients reconnect with the cursor from the last line.
fn stream_updates(
	state: AppState,
	room: RoomId,
	caller: UserId,
	since: EventId,
	extras: Vec<ResourceKind>,
) -> Response<HttpBody> {
	metrics::counter!("roomsync_server_stream_connections_total").increment(1);

	struct StreamCtx {
		api: Api,
		room: RoomId,
		caller: UserId,
		extras: Vec<ResourceKind>,
		cursor: EventId,
		deadline: tokio::time::Instant,
		poll: Duration,
		first: bool,
	}

	let ctx = StreamCtx {
		api: state.api,
		room,
		caller,
		extras,
		cursor: since,
		deadline: tokio::time::Instant::now() + state.stream_max_duration,
		poll: state.stream_poll_interval,
		first: true,
	};

	let stream = futures::stream::unfold(ctx, |mut ctx| async move {
		loop {
			if !ctx.first {
				if tokio::time::Instant::now() >= ctx.deadline {
					return None;
				}
				tokio::time::sleep(ctx.poll).await;
			}

			let now = unix_ms_now();
			let updates = match ctx
				.api
				.updates(&ctx.room, &ctx.caller, ctx.cursor, &ctx.extras, now)
				.await
			{
				Ok(u) => u,
				Err(e) => {
					warn!(room = %ctx.room, error = %e, "stream fetch failed; closing stream");
					return None;
				}
			};

			let emit = ctx.first || !updates.is_quiet();
			ctx.first = false;
			ctx.cursor = updates.cursor;

			if emit {
				let mut line = match serde_json::to_vec(&updates) {
					Ok(line) => line,
					Err(e) => {
						warn!(room = %ctx.room, error = %e, "stream encode failed; closing stream");
						return None;
					}
				};
				line.push(b'\n');
				return Some((Ok(Frame::data(Bytes::from(line))), ctx));
			}
		}
	});

	Response::builder()
		.status(StatusCode::OK)
		.header("content-type", "application/x-ndjson")
		.body(StreamBody::new(stream).boxed_unsync())
		.unwrap()
}

fn caller_identity(req: &Request<Incoming>) -> Result<UserId, ApiError> {
	let Some(raw) = req.headers().get("x-user-id") else {
		return Err(ApiError::BadRequest("missing x-user-id header".to_string()));
	};
	let raw = raw
		.to_str()
		.map_err(|_| ApiError::BadRequest("x-user-id is not valid UTF-8".to_string()))?;
	UserId::new(raw).map_err(|e| ApiError::BadRequest(format!("invalid x-user-id: {e}")))
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Incoming>) -> Result<T, ApiError> {
	let bytes = req
		.into_body()
		.collect()
		.await
		.map_err(|e| ApiError::BadRequest(format!("could not read request body: {e}")))?
		.to_bytes();
	serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

fn parse_user_ids(raw: &[String]) -> Result<Vec<UserId>, ApiError> {
	raw.iter()
		.map(|s| UserId::new(s.as_str()).map_err(|e| ApiError::BadRequest(format!("invalid mention target: {e}"))))
		.collect()
}

/// `since=N&extras=a,b,c`. An unparsable cursor falls back to 0 (resend
/// everything); unknown extras are skipped.
pub(crate) fn parse_updates_query(query: Option<&str>) -> (EventId, Vec<ResourceKind>) {
	let mut since = EventId::ZERO;
	let mut extras = Vec::new();

	for pair in query.unwrap_or_default().split('&') {
		let Some((key, value)) = pair.split_once('=') else {
			continue;
		};
		match key {
			"since" => {
				since = value.trim().parse::<i64>().map(EventId).unwrap_or(EventId::ZERO);
			}
			"extras" => {
				for name in value.split(',') {
					match name.parse::<ResourceKind>() {
						Ok(kind) => extras.push(kind),
						Err(e) => debug!(name, error = %e, "skipping unknown extras entry"),
					}
				}
			}
			_ => {}
		}
	}

	(since, extras)
}

fn status_for(e: &ApiError) -> StatusCode {
	match e {
		ApiError::RoomNotFound(_) => StatusCode::NOT_FOUND,
		ApiError::RoomExists(_) => StatusCode::CONFLICT,
		ApiError::NotPresent { .. } => StatusCode::CONFLICT,
		ApiError::NotHost => StatusCode::FORBIDDEN,
		ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
		ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

fn full(bytes: impl Into<Bytes>) -> HttpBody {
	Full::new(bytes.into()).boxed_unsync()
}

fn text_response(status: StatusCode, body: &'static str) -> Response<HttpBody> {
	Response::builder()
		.status(status)
		.header("content-type", "text/plain")
		.body(full(Bytes::from_static(body.as_bytes())))
		.unwrap()
}

fn json_response(status: StatusCode, value: &impl serde::Serialize) -> Response<HttpBody> {
	match serde_json::to_vec(value) {
		Ok(body) => Response::builder()
			.status(status)
			.header("content-type", "application/json")
			.body(full(body))
			.unwrap(),
		Err(e) => {
			warn!(error = %e, "response encode failed");
			error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error; try again")
		}
	}
}

fn error_response(status: StatusCode, message: &str) -> Response<HttpBody> {
	let body = serde_json::to_vec(&json!({ "error": message })).unwrap_or_default();
	Response::builder()
		.status(status)
		.header("content-type", "application/json")
		.body(full(body))
		.unwrap()
}
