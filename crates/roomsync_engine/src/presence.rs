#![forbid(unsafe_code)]

use roomsync_domain::{EventKind, PresenceRecord, RoomId, RoomScope, UserId};
use roomsync_store::{Store, events, presence, rooms};
use serde_json::json;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::failover::{self, FailoverPlan};

/// Outcome of a `join` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
	/// The caller was already in the room; the call behaved like `touch`.
	pub already_present: bool,
	/// The room had no host and the joiner claimed it.
	pub claimed_host: bool,
}

/// Outcome of a `leave` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
	pub was_present: bool,
	/// The ephemeral room emptied out and was deleted.
	pub room_deleted: bool,
	pub host_transferred: bool,
}

/// Outcome of a `touch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchOutcome {
	/// An auto-AFK episode ended; an `afk_cleared` event was appended.
	pub returned_from_afk: bool,
}

/// Per-(room, user) activity state machine. Every observable transition
/// appends exactly one event in the same transaction as the row change.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
	store: Store,
}

impl PresenceTracker {
	pub fn new(store: Store) -> Self {
		Self { store }
	}

	/// Enter a room. Re-joining refreshes `last_activity` instead of
	/// duplicating the row. A joiner claims host when the room has none.
	pub async fn join(&self, room: &RoomId, user: &UserId, now: i64) -> EngineResult<JoinOutcome> {
		let mut tx = self.store.begin().await?;
		let outcome = Self::join_in(&mut tx, room, user, now).await?;
		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(outcome)
	}

	/// `join` inside a caller-held transaction, so room creation can seat
	/// the creator atomically with the room row.
	pub async fn join_in(
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		room: &RoomId,
		user: &UserId,
		now: i64,
	) -> EngineResult<JoinOutcome> {
		let Some(room_rec) = rooms::get_in(&mut **tx, room).await? else {
			return Err(EngineError::RoomNotFound(room.clone()));
		};

		if presence::get_in(&mut **tx, room, user).await?.is_some() {
			presence::touch_in(&mut **tx, room, user, now).await?;
			return Ok(JoinOutcome {
				already_present: true,
				claimed_host: false,
			});
		}

		let claimed_host = room_rec.host_user_id.is_none() && presence::host_in(&mut **tx, room).await?.is_none();

		presence::insert_in(
			&mut **tx,
			&PresenceRecord {
				room_id: room.clone(),
				user_id: user.clone(),
				is_host: claimed_host,
				is_afk: false,
				manual_afk: false,
				afk_since: None,
				joined_at: now,
				last_activity: now,
			},
		)
		.await?;

		if claimed_host {
			rooms::set_host_in(&mut **tx, room, Some(user)).await?;
		}

		let payload = serde_json::to_vec(&json!({ "user": user.as_str(), "host": claimed_host }))
			.map_err(anyhow::Error::from)?;
		events::append_in(&mut **tx, &RoomScope::Room(room.clone()), EventKind::UserJoin, &payload, now).await?;

		Ok(JoinOutcome {
			already_present: false,
			claimed_host,
		})
	}

	/// Leave a room (also the disconnect/ban/kick path). Removing the host
	/// or the last member resolves failover in the same transaction.
	pub async fn leave(&self, room: &RoomId, user: &UserId, now: i64) -> EngineResult<LeaveOutcome> {
		let mut tx = self.store.begin().await?;

		let Some(room_rec) = rooms::get_in(&mut *tx, room).await? else {
			// Concurrent teardown already removed everything.
			return Ok(LeaveOutcome {
				was_present: false,
				room_deleted: true,
				host_transferred: false,
			});
		};

		let Some(row) = presence::get_in(&mut *tx, room, user).await? else {
			return Ok(LeaveOutcome {
				was_present: false,
				room_deleted: false,
				host_transferred: false,
			});
		};

		presence::delete_in(&mut *tx, room, user).await?;
		let survivors = presence::list_in(&mut *tx, room).await?;

		let host_lost = row.is_host || room_rec.host_user_id.as_ref() == Some(user);
		let needs_resolution = host_lost || survivors.is_empty();

		if needs_resolution {
			let plan = failover::plan(&room_rec, &survivors);
			if plan == FailoverPlan::Teardown {
				failover::apply_in(&mut tx, room, &plan, now).await?;
				tx.commit().await.map_err(anyhow::Error::from)?;
				debug!(room = %room, "ephemeral room emptied; torn down");
				return Ok(LeaveOutcome {
					was_present: true,
					room_deleted: true,
					host_transferred: false,
				});
			}

			let payload = serde_json::to_vec(&json!({ "user": user.as_str() })).map_err(anyhow::Error::from)?;
			events::append_in(&mut *tx, &RoomScope::Room(room.clone()), EventKind::UserLeave, &payload, now).await?;

			let host_transferred = if host_lost {
				let applied = failover::apply_in(&mut tx, room, &plan, now).await?;
				applied.is_some() && matches!(plan, FailoverPlan::Promote { .. })
			} else {
				false
			};

			tx.commit().await.map_err(anyhow::Error::from)?;
			return Ok(LeaveOutcome {
				was_present: true,
				room_deleted: false,
				host_transferred,
			});
		}

		let payload = serde_json::to_vec(&json!({ "user": user.as_str() })).map_err(anyhow::Error::from)?;
		events::append_in(&mut *tx, &RoomScope::Room(room.clone()), EventKind::UserLeave, &payload, now).await?;

		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(LeaveOutcome {
			was_present: true,
			room_deleted: false,
			host_transferred: false,
		})
	}

	/// Record user activity. Clears auto-AFK (never manual AFK) and
	/// appends `afk_cleared` in the same transaction when it does.
	pub async fn touch(&self, room: &RoomId, user: &UserId, now: i64) -> EngineResult<TouchOutcome> {
		let mut tx = self.store.begin().await?;
		let outcome = Self::touch_in(&mut tx, room, user, now).await?;
		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(outcome)
	}

	/// `touch` inside a caller-held transaction, so a write path can make
	/// its own event append and the AFK transition atomic (a message sent
	/// while auto-AFK commits the message and `afk_cleared` together).
	pub async fn touch_in(
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		room: &RoomId,
		user: &UserId,
		now: i64,
	) -> EngineResult<TouchOutcome> {
		let Some(row) = presence::get_in(&mut **tx, room, user).await? else {
			return Err(EngineError::NotPresent {
				room: room.clone(),
				user: user.clone(),
			});
		};

		presence::touch_in(&mut **tx, room, user, now).await?;

		let returned_from_afk = row.is_afk && !row.manual_afk;
		if returned_from_afk {
			presence::clear_afk_in(&mut **tx, room, user).await?;
			let payload = serde_json::to_vec(&json!({ "user": user.as_str() })).map_err(anyhow::Error::from)?;
			events::append_in(&mut **tx, &RoomScope::Room(room.clone()), EventKind::AfkCleared, &payload, now).await?;
		}

		Ok(TouchOutcome { returned_from_afk })
	}

	/// Explicit AFK toggle; always honored regardless of elapsed time.
	/// Returns whether an observable transition happened (and so whether
	/// an event was appended).
	pub async fn set_manual_afk(&self, room: &RoomId, user: &UserId, afk: bool, now: i64) -> EngineResult<bool> {
		let mut tx = self.store.begin().await?;

		let Some(row) = presence::get_in(&mut *tx, room, user).await? else {
			return Err(EngineError::NotPresent {
				room: room.clone(),
				user: user.clone(),
			});
		};

		let changed = if afk {
			// The toggle itself is user activity; it must reset the
			// disconnect clock even though the user is entering AFK.
			presence::touch_in(&mut *tx, room, user, now).await?;
			// Upgrading auto-AFK to manual is not a new AFK episode.
			let entered = !row.is_afk;
			presence::set_afk_in(&mut *tx, room, user, true, row.afk_since.unwrap_or(now)).await?;
			if entered {
				let payload =
					serde_json::to_vec(&json!({ "user": user.as_str(), "manual": true })).map_err(anyhow::Error::from)?;
				events::append_in(&mut *tx, &RoomScope::Room(room.clone()), EventKind::AfkEntered, &payload, now)
					.await?;
			}
			entered || !row.manual_afk
		} else if row.is_afk {
			presence::clear_afk_in(&mut *tx, room, user).await?;
			presence::touch_in(&mut *tx, room, user, now).await?;
			let payload = serde_json::to_vec(&json!({ "user": user.as_str() })).map_err(anyhow::Error::from)?;
			events::append_in(&mut *tx, &RoomScope::Room(room.clone()), EventKind::AfkCleared, &payload, now).await?;
			true
		} else {
			false
		};

		tx.commit().await.map_err(anyhow::Error::from)?;
		Ok(changed)
	}

	/// Read-only status query for UI surfaces (idle countdowns).
	pub async fn snapshot(&self, room: &RoomId, user: &UserId) -> EngineResult<PresenceRecord> {
		self.store
			.presence(room, user)
			.await?
			.ok_or_else(|| EngineError::NotPresent {
				room: room.clone(),
				user: user.clone(),
			})
	}
}
