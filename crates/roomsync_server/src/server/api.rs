#![forbid(unsafe_code)]

use std::sync::Arc;

use roomsync_domain::{EventId, EventKind, MessageId, ResourceKind, RoomId, RoomRecord, RoomScope, UserId};
use roomsync_engine::fetch::{ExtraProjector, RoomUpdates, SyncConfig, SyncEngine};
use roomsync_engine::presence::{JoinOutcome, LeaveOutcome, PresenceTracker, TouchOutcome};
use roomsync_engine::{EngineError, SweepThresholds};
use roomsync_store::{Store, events, presence, rooms};
use serde_json::json;
use tracing::debug;

/// Request-level failures the transport maps to status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("room not found: {0}")]
	RoomNotFound(RoomId),

	#[error("room already exists: {0}")]
	RoomExists(RoomId),

	#[error("user {user} is not present in room {room}")]
	NotPresent { room: RoomId, user: UserId },

	#[error("only the host may change room settings")]
	NotHost,

	#[error("{0}")]
	BadRequest(String),

	#[error(transparent)]
	Internal(#[from] anyhow::Error),
}

impl From<EngineError> for ApiError {
	fn from(e: EngineError) -> Self {
		match e {
			EngineError::RoomNotFound(room) => ApiError::RoomNotFound(room),
			EngineError::NotPresent { room, user } => ApiError::NotPresent { room, user },
			EngineError::Store(e) => ApiError::Internal(e),
		}
	}
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Transport-agnostic operations behind the HTTP routes. Timestamps are
/// passed in so handlers stay deterministic under test.
#[derive(Clone)]
pub struct Api {
	store: Store,
	tracker: PresenceTracker,
	sync: SyncEngine,
}

impl Api {
	pub fn new(store: Store, extras: Arc<dyn ExtraProjector>, thresholds: SweepThresholds, fetch_limit: i64) -> Self {
		let mut cfg = SyncConfig::new(thresholds);
		cfg.fetch_limit = fetch_limit;
		Self {
			store: store.clone(),
			tracker: PresenceTracker::new(store.clone()),
			sync: SyncEngine::new(store, extras, cfg),
		}
	}

	pub fn store(&self) -> &Store {
		&self.store
	}

	/// Create a room and announce it on the broadcast scope. The creator
	/// is seated (and claims host) in the same transaction as the room
	/// row, so a crash cannot strand a member-less room.
	pub async fn create_room(
		&self,
		room: &RoomId,
		name: &str,
		permanent: bool,
		creator: &UserId,
		now: i64,
	) -> ApiResult<()> {
		let mut tx = self.store.begin().await?;

		if rooms::get_in(&mut *tx, room).await?.is_some() {
			return Err(ApiError::RoomExists(room.clone()));
		}

		rooms::insert_in(
			&mut *tx,
			&RoomRecord {
				id: room.clone(),
				name: name.to_string(),
				host_user_id: None,
				permanent,
				created_at: now,
			},
		)
		.await?;

		let payload = serde_json::to_vec(&json!({
			"room": room.as_str(),
			"name": name,
			"permanent": permanent,
		}))
		.map_err(anyhow::Error::from)?;
		events::append_in(&mut *tx, &RoomScope::Broadcast, EventKind::RoomUpdate, &payload, now).await?;

		PresenceTracker::join_in(&mut tx, room, creator, now).await?;

		tx.commit().await.map_err(anyhow::Error::from)?;
		debug!(room = %room, permanent, "room created");
		Ok(())
	}

	pub async fn join(&self, room: &RoomId, user: &UserId, now: i64) -> ApiResult<JoinOutcome> {
		Ok(self.tracker.join(room, user, now).await?)
	}

	pub async fn leave(&self, room: &RoomId, user: &UserId, now: i64) -> ApiResult<LeaveOutcome> {
		Ok(self.tracker.leave(room, user, now).await?)
	}

	pub async fn touch(&self, room: &RoomId, user: &UserId, now: i64) -> ApiResult<TouchOutcome> {
		Ok(self.tracker.touch(room, user, now).await?)
	}

	pub async fn set_afk(&self, room: &RoomId, user: &UserId, afk: bool, now: i64) -> ApiResult<bool> {
		Ok(self.tracker.set_manual_afk(room, user, afk, now).await?)
	}

	/// Append a message (and a mention per target) in one transaction with
	/// the sender's activity touch, so a message sent while auto-AFK lands
	/// together with its `afk_cleared`.
	pub async fn send_message(
		&self,
		room: &RoomId,
		sender: &UserId,
		text: &str,
		mention_targets: &[UserId],
		now: i64,
	) -> ApiResult<EventId> {
		if text.trim().is_empty() {
			return Err(ApiError::BadRequest("message text must be non-empty".to_string()));
		}

		let mut tx = self.store.begin().await?;
		PresenceTracker::touch_in(&mut tx, room, sender, now).await?;

		let message_id = MessageId::new_v4();
		let payload = serde_json::to_vec(&json!({
			"message_id": message_id,
			"user": sender.as_str(),
			"text": text,
		}))
		.map_err(anyhow::Error::from)?;
		let scope = RoomScope::Room(room.clone());
		let event_id = events::append_in(&mut *tx, &scope, EventKind::Message, &payload, now).await?;

		for target in mention_targets {
			let payload = serde_json::to_vec(&json!({
				"message_id": message_id,
				"target": target.as_str(),
				"from": sender.as_str(),
				"text": text,
			}))
			.map_err(anyhow::Error::from)?;
			events::append_in(&mut *tx, &scope, EventKind::Mention, &payload, now).await?;
		}

		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(event_id)
	}

	/// A non-member asking to enter. Only records the request; admission is
	/// the host's call.
	pub async fn knock(&self, room: &RoomId, user: &UserId, now: i64) -> ApiResult<EventId> {
		let mut tx = self.store.begin().await?;

		if rooms::get_in(&mut *tx, room).await?.is_none() {
			return Err(ApiError::RoomNotFound(room.clone()));
		}

		let payload = serde_json::to_vec(&json!({ "user": user.as_str() })).map_err(anyhow::Error::from)?;
		let event_id = events::append_in(&mut *tx, &RoomScope::Room(room.clone()), EventKind::Knock, &payload, now).await?;

		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(event_id)
	}

	/// Private message between two members. The room log only carries the
	/// routing envelope; the whisper body never enters the shared log.
	pub async fn whisper(&self, room: &RoomId, from: &UserId, to: &UserId, now: i64) -> ApiResult<EventId> {
		let mut tx = self.store.begin().await?;
		PresenceTracker::touch_in(&mut tx, room, from, now).await?;

		if presence::get_in(&mut *tx, room, to).await?.is_none() {
			return Err(ApiError::NotPresent {
				room: room.clone(),
				user: to.clone(),
			});
		}

		let payload = serde_json::to_vec(&json!({ "from": from.as_str(), "to": to.as_str() }))
			.map_err(anyhow::Error::from)?;
		let event_id =
			events::append_in(&mut *tx, &RoomScope::Room(room.clone()), EventKind::Whisper, &payload, now).await?;

		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(event_id)
	}

	/// Host-only settings update; appends the `room_update` that makes the
	/// change visible to every member's next fetch.
	pub async fn update_settings(
		&self,
		room: &RoomId,
		caller: &UserId,
		name: &str,
		permanent: bool,
		now: i64,
	) -> ApiResult<()> {
		if name.trim().is_empty() {
			return Err(ApiError::BadRequest("room name must be non-empty".to_string()));
		}

		let mut tx = self.store.begin().await?;

		let Some(room_rec) = rooms::get_in(&mut *tx, room).await? else {
			return Err(ApiError::RoomNotFound(room.clone()));
		};
		if room_rec.host_user_id.as_ref() != Some(caller) {
			return Err(ApiError::NotHost);
		}

		PresenceTracker::touch_in(&mut tx, room, caller, now).await?;
		rooms::update_settings_in(&mut *tx, room, name, permanent).await?;

		let payload = serde_json::to_vec(&json!({ "name": name, "permanent": permanent }))
			.map_err(anyhow::Error::from)?;
		events::append_in(&mut *tx, &RoomScope::Room(room.clone()), EventKind::RoomUpdate, &payload, now).await?;

		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(())
	}

	/// The delta fetch behind both the poll and stream transports.
	pub async fn updates(
		&self,
		room: &RoomId,
		caller: &UserId,
		since: EventId,
		extras: &[ResourceKind],
		now: i64,
	) -> ApiResult<RoomUpdates> {
		Ok(self.sync.get_updates(room, caller, since, extras, now).await?)
	}
}
