#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use roomsync_domain::{EventId, EventKind, EventRecord, ResourceKind, RoomId, RoomRecord, UserId};
use roomsync_store::{Store, events, presence};
use serde::Serialize;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::hashgate::ChangeHashCache;
use crate::sweep::{SweepThresholds, resolve_host_loss};

/// Delta-fetch tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Cap on events per fetch; bounds a single response.
	pub fetch_limit: i64,
	/// Presence thresholds, used for the disconnect countdown.
	pub thresholds: SweepThresholds,
}

impl SyncConfig {
	pub fn new(thresholds: SweepThresholds) -> Self {
		Self {
			fetch_limit: events::DEFAULT_FETCH_LIMIT,
			thresholds,
		}
	}
}

/// Source of resource projections owned by external collaborators
/// (friends, whisper summaries, pending knocks). The engine decides when
/// to ask and hash-gates the answer; `None` means "nothing to project".
#[async_trait]
pub trait ExtraProjector: Send + Sync {
	async fn project(&self, room: &RoomId, kind: ResourceKind, caller: &UserId)
	-> anyhow::Result<Option<serde_json::Value>>;
}

/// Default projector for deployments without the adjacent features.
pub struct NullProjector;

#[async_trait]
impl ExtraProjector for NullProjector {
	async fn project(
		&self,
		_room: &RoomId,
		_kind: ResourceKind,
		_caller: &UserId,
	) -> anyhow::Result<Option<serde_json::Value>> {
		Ok(None)
	}
}

/// One event projected into the `messages` / `mentions` blocks.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
	pub id: EventId,
	pub kind: EventKind,
	pub payload: serde_json::Value,
	pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserListEntry {
	pub user_id: UserId,
	pub is_host: bool,
	pub is_afk: bool,
	pub afk_since: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSettingsView {
	pub id: RoomId,
	pub name: String,
	pub host_user_id: Option<UserId>,
	pub permanent: bool,
}

/// Caller's own presence, always included so a client can render its
/// disconnect countdown without waiting for a triggering event.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceView {
	pub user_id: UserId,
	pub is_host: bool,
	pub is_afk: bool,
	pub manual_afk: bool,
	pub afk_since: Option<i64>,
	pub last_activity: i64,
	pub disconnect_in_ms: i64,
}

/// Structured delta-fetch result. A missing resource key means
/// "unchanged since your cursor", never "empty".
#[derive(Debug, Clone, Serialize)]
pub struct RoomUpdates {
	pub cursor: EventId,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub messages: Option<Vec<MessageView>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mentions: Option<Vec<MessageView>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_list: Option<Vec<UserListEntry>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub room_settings: Option<RoomSettingsView>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub knocks: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub whispers_summary: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub friends: Option<serde_json::Value>,
	pub my_presence: Option<PresenceView>,
}

impl RoomUpdates {
	fn quiet(cursor: EventId, my_presence: Option<PresenceView>) -> Self {
		Self {
			cursor,
			messages: None,
			mentions: None,
			user_list: None,
			room_settings: None,
			knocks: None,
			whispers_summary: None,
			friends: None,
			my_presence,
		}
	}

	/// True when no resource block beyond the caller's own presence is set.
	pub fn is_quiet(&self) -> bool {
		self.messages.is_none()
			&& self.mentions.is_none()
			&& self.user_list.is_none()
			&& self.room_settings.is_none()
			&& self.knocks.is_none()
			&& self.whispers_summary.is_none()
			&& self.friends.is_none()
	}
}

/// Which event kinds make a hash-gated resource worth re-projecting.
fn triggers(kind: ResourceKind) -> &'static [EventKind] {
	match kind {
		ResourceKind::UserList => &[
			EventKind::Message,
			EventKind::UserJoin,
			EventKind::UserLeave,
			EventKind::AfkEntered,
			EventKind::AfkCleared,
			EventKind::HostTransferred,
		],
		ResourceKind::RoomSettings => &[EventKind::RoomUpdate, EventKind::HostTransferred],
		ResourceKind::Knocks => &[EventKind::Knock],
		ResourceKind::WhispersSummary => &[EventKind::Whisper],
		ResourceKind::Friends => &[EventKind::UserJoin, EventKind::UserLeave],
		// Event-exact and always-on resources never consult the gate.
		ResourceKind::Messages | ResourceKind::Mentions | ResourceKind::MyPresence => &[],
	}
}

/// The canonical read path shared by the poll and stream transports.
#[derive(Clone)]
pub struct SyncEngine {
	store: Store,
	gate: ChangeHashCache,
	extras: Arc<dyn ExtraProjector>,
	cfg: SyncConfig,
}

impl SyncEngine {
	pub fn new(store: Store, extras: Arc<dyn ExtraProjector>, cfg: SyncConfig) -> Self {
		let gate = ChangeHashCache::new(store.clone());
		Self {
			store,
			gate,
			extras,
			cfg,
		}
	}

	pub fn store(&self) -> &Store {
		&self.store
	}

	/// Serve a client's cursor. `requested_extras` names the
	/// collaborator-owned blocks this client cares about.
	pub async fn get_updates(
		&self,
		room_id: &RoomId,
		caller: &UserId,
		last_event_id: EventId,
		requested_extras: &[ResourceKind],
		now: i64,
	) -> EngineResult<RoomUpdates> {
		let room = self.ensure_consistent_host(room_id, now).await?;

		let since = self.clamp_cursor(last_event_id).await?;
		let batch = self.store.fetch_since(room_id, since, self.cfg.fetch_limit).await?;

		let my_presence = self.my_presence(room_id, caller, now).await?;

		let Some(last) = batch.last() else {
			return Ok(RoomUpdates::quiet(since, my_presence));
		};
		let cursor = last.id;

		let kinds: BTreeSet<EventKind> = batch.iter().map(|e| e.kind).collect();
		let mut updates = RoomUpdates::quiet(cursor, my_presence);

		// Event-kind-exact blocks come straight from the batch.
		if kinds.contains(&EventKind::Message) {
			updates.messages = Some(project_batch(&batch, |e| e.kind == EventKind::Message));
		}
		if kinds.contains(&EventKind::Mention) {
			let mine = project_batch(&batch, |e| e.kind == EventKind::Mention);
			let mine: Vec<MessageView> = mine
				.into_iter()
				.filter(|m| m.payload.get("target").and_then(|t| t.as_str()) == Some(caller.as_str()))
				.collect();
			if !mine.is_empty() {
				updates.mentions = Some(mine);
			}
		}

		if hit(&kinds, ResourceKind::UserList) {
			let listing: Vec<UserListEntry> = self
				.store
				.room_presences(room_id)
				.await?
				.into_iter()
				.map(|p| UserListEntry {
					user_id: p.user_id,
					is_host: p.is_host,
					is_afk: p.is_afk,
					afk_since: p.afk_since,
				})
				.collect();
			let bytes = serde_json::to_vec(&listing).map_err(anyhow::Error::from)?;
			if self.gate.should_emit(room_id, ResourceKind::UserList, &bytes, now).await? {
				updates.user_list = Some(listing);
			}
		}

		if hit(&kinds, ResourceKind::RoomSettings) {
			let view = RoomSettingsView {
				id: room.id.clone(),
				name: room.name.clone(),
				host_user_id: room.host_user_id.clone(),
				permanent: room.permanent,
			};
			let bytes = serde_json::to_vec(&view).map_err(anyhow::Error::from)?;
			if self.gate.should_emit(room_id, ResourceKind::RoomSettings, &bytes, now).await? {
				updates.room_settings = Some(view);
			}
		}

		for kind in requested_extras {
			let kind = *kind;
			if !matches!(
				kind,
				ResourceKind::Knocks | ResourceKind::WhispersSummary | ResourceKind::Friends
			) {
				continue;
			}
			if !hit(&kinds, kind) {
				continue;
			}
			let Some(value) = self.extras.project(room_id, kind, caller).await? else {
				continue;
			};
			let bytes = serde_json::to_vec(&value).map_err(anyhow::Error::from)?;
			if self.gate.should_emit(room_id, kind, &bytes, now).await? {
				match kind {
					ResourceKind::Knocks => updates.knocks = Some(value),
					ResourceKind::WhispersSummary => updates.whispers_summary = Some(value),
					ResourceKind::Friends => updates.friends = Some(value),
					_ => {}
				}
			}
		}

		Ok(updates)
	}

	/// Read-path backstop: the recorded host pointer must refer to a
	/// presence that exists and is flagged. Anything else is self-healed
	/// by a synchronous failover before data is served.
	async fn ensure_consistent_host(&self, room_id: &RoomId, now: i64) -> EngineResult<RoomRecord> {
		let Some(room) = self.store.room(room_id).await? else {
			return Err(EngineError::RoomNotFound(room_id.clone()));
		};

		let flagged = presence::host_in(self.store.pool(), room_id).await?;

		let consistent = match (&room.host_user_id, &flagged) {
			(Some(pointer), Some(p)) => pointer == &p.user_id,
			(None, None) => true,
			_ => false,
		};

		if consistent {
			return Ok(room);
		}

		warn!(room = %room_id, "host pointer inconsistent with presences; resolving failover");
		resolve_host_loss(&self.store, room_id, now).await?;

		match self.store.room(room_id).await? {
			Some(room) => Ok(room),
			None => Err(EngineError::RoomNotFound(room_id.clone())),
		}
	}

	/// Stale or out-of-range cursors mean "resend everything".
	async fn clamp_cursor(&self, cursor: EventId) -> EngineResult<EventId> {
		if cursor.as_i64() < 0 {
			return Ok(EventId::ZERO);
		}
		let latest = self.store.latest_event_id().await?;
		if cursor > latest {
			return Ok(EventId::ZERO);
		}
		Ok(cursor)
	}

	async fn my_presence(&self, room_id: &RoomId, caller: &UserId, now: i64) -> EngineResult<Option<PresenceView>> {
		let Some(p) = self.store.presence(room_id, caller).await? else {
			return Ok(None);
		};

		let deadline = p.last_activity.saturating_add(self.cfg.thresholds.disconnect_after_ms);
		Ok(Some(PresenceView {
			user_id: p.user_id,
			is_host: p.is_host,
			is_afk: p.is_afk,
			manual_afk: p.manual_afk,
			afk_since: p.afk_since,
			last_activity: p.last_activity,
			disconnect_in_ms: deadline.saturating_sub(now).max(0),
		}))
	}
}

fn hit(kinds: &BTreeSet<EventKind>, resource: ResourceKind) -> bool {
	triggers(resource).iter().any(|k| kinds.contains(k))
}

fn project_batch(batch: &[EventRecord], select: impl Fn(&EventRecord) -> bool) -> Vec<MessageView> {
	batch
		.iter()
		.filter(|e| select(e))
		.filter_map(|e| match serde_json::from_slice::<serde_json::Value>(&e.payload) {
			Ok(payload) => Some(MessageView {
				id: e.id,
				kind: e.kind,
				payload,
				created_at: e.created_at,
			}),
			Err(err) => {
				warn!(event = %e.id, error = %err, "skipping undecodable event payload");
				None
			}
		})
		.collect()
}
