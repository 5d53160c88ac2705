#![forbid(unsafe_code)]

use roomsync_domain::{EventId, EventKind, PresenceRecord, RoomId, RoomRecord, RoomScope, UserId};
use roomsync_store::{events, hashes, presence, rooms};
use serde_json::json;

/// Resolution for a room that lost its host. Exactly one branch applies
/// per trigger and is executed inside the caller's transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverPlan {
	/// Promote the given survivor to host.
	Promote { user: UserId },
	/// Permanent room, nobody left: clear the pointer, keep the room.
	ClearHost,
	/// Ephemeral room, nobody left: delete all room state.
	Teardown,
}

/// Decide the failover branch. `survivors` must already be in promotion
/// order (earliest `joined_at`, then lowest rowid) as returned by
/// `presence::list_in`.
pub fn plan(room: &RoomRecord, survivors: &[PresenceRecord]) -> FailoverPlan {
	match survivors.first() {
		Some(next) => FailoverPlan::Promote {
			user: next.user_id.clone(),
		},
		None if room.permanent => FailoverPlan::ClearHost,
		None => FailoverPlan::Teardown,
	}
}

/// Apply a plan inside `tx`. Returns the appended event id, if any;
/// teardown appends nothing since the room no longer exists to scope it.
/// Re-applying against an already-deleted room is a no-op.
pub async fn apply_in(
	tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
	room_id: &RoomId,
	plan: &FailoverPlan,
	now: i64,
) -> anyhow::Result<Option<EventId>> {
	match plan {
		FailoverPlan::Promote { user } => {
			presence::clear_host_flags_in(&mut **tx, room_id).await?;
			presence::set_host_flag_in(&mut **tx, room_id, user).await?;
			rooms::set_host_in(&mut **tx, room_id, Some(user)).await?;

			let payload = serde_json::to_vec(&json!({ "new_host": user.as_str() }))?;
			let id = events::append_in(
				&mut **tx,
				&RoomScope::Room(room_id.clone()),
				EventKind::HostTransferred,
				&payload,
				now,
			)
			.await?;
			Ok(Some(id))
		}
		FailoverPlan::ClearHost => {
			presence::clear_host_flags_in(&mut **tx, room_id).await?;
			rooms::set_host_in(&mut **tx, room_id, None).await?;

			let payload = serde_json::to_vec(&json!({ "host": null }))?;
			let id = events::append_in(
				&mut **tx,
				&RoomScope::Room(room_id.clone()),
				EventKind::RoomUpdate,
				&payload,
				now,
			)
			.await?;
			Ok(Some(id))
		}
		FailoverPlan::Teardown => {
			presence::delete_room_in(&mut **tx, room_id).await?;
			hashes::delete_room_in(&mut **tx, room_id).await?;
			events::delete_room_scoped_in(&mut **tx, room_id).await?;
			rooms::delete_in(&mut **tx, room_id).await?;
			Ok(None)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn presence(room: &str, user: &str, joined_at: i64) -> PresenceRecord {
		PresenceRecord {
			room_id: RoomId::new(room).expect("valid RoomId"),
			user_id: UserId::new(user).expect("valid UserId"),
			is_host: false,
			is_afk: false,
			manual_afk: false,
			afk_since: None,
			joined_at,
			last_activity: joined_at,
		}
	}

	fn room(id: &str, permanent: bool) -> RoomRecord {
		RoomRecord {
			id: RoomId::new(id).expect("valid RoomId"),
			name: id.to_string(),
			host_user_id: None,
			permanent,
			created_at: 0,
		}
	}

	#[test]
	fn promotes_first_survivor() {
		let survivors = vec![presence("r", "early", 10), presence("r", "late", 20)];
		assert_eq!(
			plan(&room("r", false), &survivors),
			FailoverPlan::Promote {
				user: UserId::new("early").unwrap()
			}
		);
	}

	#[test]
	fn empty_permanent_room_goes_hostless() {
		assert_eq!(plan(&room("r", true), &[]), FailoverPlan::ClearHost);
	}

	#[test]
	fn empty_ephemeral_room_is_torn_down() {
		assert_eq!(plan(&room("r", false), &[]), FailoverPlan::Teardown);
	}
}
