#![forbid(unsafe_code)]

use anyhow::ensure;
use roomsync_domain::{EventKind, PresenceRecord, RoomId, RoomScope, UserId};
use roomsync_store::{Store, events, presence, rooms};
use serde_json::json;
use tracing::{debug, warn};

use crate::failover::{self, FailoverPlan};

/// Aging thresholds. `afk_after` must be strictly below `disconnect_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepThresholds {
	pub afk_after_ms: i64,
	pub disconnect_after_ms: i64,
}

impl SweepThresholds {
	pub fn new(afk_after_ms: i64, disconnect_after_ms: i64) -> anyhow::Result<Self> {
		ensure!(afk_after_ms > 0, "afk threshold must be positive");
		ensure!(
			afk_after_ms < disconnect_after_ms,
			"afk threshold ({afk_after_ms}ms) must be below disconnect threshold ({disconnect_after_ms}ms)"
		);
		Ok(Self {
			afk_after_ms,
			disconnect_after_ms,
		})
	}
}

/// What one pass does to one presence row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
	None,
	MarkAfk,
	Disconnect,
}

/// Pure aging decision. Every row of a pass is evaluated against the same
/// sweep-start `now` so a slow pass cannot skew thresholds.
pub fn classify(row: &PresenceRecord, thresholds: &SweepThresholds, now: i64) -> SweepAction {
	let elapsed = now.saturating_sub(row.last_activity);
	if elapsed >= thresholds.disconnect_after_ms {
		SweepAction::Disconnect
	} else if elapsed >= thresholds.afk_after_ms && !row.is_afk {
		SweepAction::MarkAfk
	} else {
		SweepAction::None
	}
}

/// Per-pass counts, reported for operational visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
	pub rooms_swept: u64,
	pub marked_afk: u64,
	pub disconnected: u64,
	pub hosts_transferred: u64,
	pub rooms_deleted: u64,
	pub failed_rooms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RoomOutcome {
	marked_afk: u64,
	disconnected: u64,
	host_transferred: bool,
	room_deleted: bool,
}

/// Periodic promotion of stale presences through active → AFK →
/// disconnected. Safe to run concurrently with pollers and with itself:
/// each room is one transaction over its own rows.
#[derive(Debug, Clone)]
pub struct AgingSweep {
	store: Store,
	thresholds: SweepThresholds,
}

impl AgingSweep {
	pub fn new(store: Store, thresholds: SweepThresholds) -> Self {
		Self { store, thresholds }
	}

	/// One full pass over all rooms. A failing room is logged and skipped;
	/// the pass itself only fails when the room list cannot be read.
	pub async fn run(&self, now: i64) -> anyhow::Result<SweepReport> {
		let mut report = SweepReport::default();

		for room_id in self.store.room_ids().await? {
			match self.sweep_room(&room_id, now).await {
				Ok(outcome) => {
					report.rooms_swept += 1;
					report.marked_afk += outcome.marked_afk;
					report.disconnected += outcome.disconnected;
					if outcome.host_transferred {
						report.hosts_transferred += 1;
					}
					if outcome.room_deleted {
						report.rooms_deleted += 1;
					}
				}
				Err(e) => {
					report.failed_rooms += 1;
					warn!(room = %room_id, error = %e, "sweep: room pass failed; continuing");
				}
			}
		}

		debug!(
			rooms = report.rooms_swept,
			afk = report.marked_afk,
			disconnected = report.disconnected,
			failed = report.failed_rooms,
			"sweep pass complete"
		);
		Ok(report)
	}

	async fn sweep_room(&self, room_id: &RoomId, now: i64) -> anyhow::Result<RoomOutcome> {
		let mut outcome = RoomOutcome::default();
		let mut tx = self.store.begin().await?;

		// Deleted mid-sweep by a concurrent teardown: nothing to do.
		let Some(room_rec) = rooms::get_in(&mut *tx, room_id).await? else {
			return Ok(outcome);
		};

		let rows = presence::list_in(&mut *tx, room_id).await?;
		let mut disconnected: Vec<PresenceRecord> = Vec::new();

		for row in &rows {
			match classify(row, &self.thresholds, now) {
				SweepAction::None => {}
				SweepAction::MarkAfk => {
					presence::set_afk_in(&mut *tx, room_id, &row.user_id, false, now).await?;
					let payload = serde_json::to_vec(&json!({ "user": row.user_id.as_str(), "manual": false }))?;
					events::append_in(&mut *tx, &RoomScope::Room(room_id.clone()), EventKind::AfkEntered, &payload, now)
						.await?;
					outcome.marked_afk += 1;
				}
				SweepAction::Disconnect => {
					presence::delete_in(&mut *tx, room_id, &row.user_id).await?;
					disconnected.push(row.clone());
				}
			}
		}

		if disconnected.is_empty() {
			tx.commit().await?;
			return Ok(outcome);
		}

		outcome.disconnected = disconnected.len() as u64;
		let survivors = presence::list_in(&mut *tx, room_id).await?;

		let host_lost = disconnected.iter().any(|p| p.is_host)
			|| room_rec
				.host_user_id
				.as_ref()
				.is_some_and(|h| disconnected.iter().any(|p| &p.user_id == h));

		let plan = if host_lost || survivors.is_empty() {
			Some(failover::plan(&room_rec, &survivors))
		} else {
			None
		};

		if plan == Some(FailoverPlan::Teardown) {
			failover::apply_in(&mut tx, room_id, &FailoverPlan::Teardown, now).await?;
			tx.commit().await?;
			outcome.room_deleted = true;
			debug!(room = %room_id, "sweep: ephemeral room emptied; torn down");
			return Ok(outcome);
		}

		for row in &disconnected {
			let payload = serde_json::to_vec(&json!({ "user": row.user_id.as_str(), "reason": "timeout" }))?;
			events::append_in(&mut *tx, &RoomScope::Room(room_id.clone()), EventKind::UserLeave, &payload, now).await?;
		}

		if let Some(plan) = plan {
			failover::apply_in(&mut tx, room_id, &plan, now).await?;
			outcome.host_transferred = matches!(plan, FailoverPlan::Promote { .. });
		}

		tx.commit().await?;
		Ok(outcome)
	}
}

/// Convenience for callers resolving a host inconsistency outside the
/// sweep (the read-path backstop).
pub async fn resolve_host_loss(store: &Store, room_id: &RoomId, now: i64) -> anyhow::Result<Option<UserId>> {
	let mut tx = store.begin().await?;

	let Some(room_rec) = rooms::get_in(&mut *tx, room_id).await? else {
		return Ok(None);
	};

	let survivors = presence::list_in(&mut *tx, room_id).await?;
	let plan = failover::plan(&room_rec, &survivors);
	failover::apply_in(&mut tx, room_id, &plan, now).await?;
	tx.commit().await?;

	match plan {
		FailoverPlan::Promote { user } => Ok(Some(user)),
		_ => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn row(last_activity: i64, is_afk: bool) -> PresenceRecord {
		PresenceRecord {
			room_id: RoomId::new("r").expect("valid RoomId"),
			user_id: UserId::new("u").expect("valid UserId"),
			is_host: false,
			is_afk,
			manual_afk: false,
			afk_since: None,
			joined_at: 0,
			last_activity,
		}
	}

	#[test]
	fn classify_respects_threshold_bands() {
		let t = SweepThresholds::new(1_000, 5_000).expect("thresholds");

		assert_eq!(classify(&row(9_500, false), &t, 10_000), SweepAction::None);
		assert_eq!(classify(&row(8_000, false), &t, 10_000), SweepAction::MarkAfk);
		assert_eq!(classify(&row(8_000, true), &t, 10_000), SweepAction::None);
		assert_eq!(classify(&row(4_000, false), &t, 10_000), SweepAction::Disconnect);
		assert_eq!(classify(&row(4_000, true), &t, 10_000), SweepAction::Disconnect);
	}

	#[test]
	fn classify_at_exact_boundaries() {
		let t = SweepThresholds::new(1_000, 5_000).expect("thresholds");

		// elapsed == T_afk enters AFK; elapsed == T_disconnect disconnects.
		assert_eq!(classify(&row(9_000, false), &t, 10_000), SweepAction::MarkAfk);
		assert_eq!(classify(&row(5_000, false), &t, 10_000), SweepAction::Disconnect);
	}

	#[test]
	fn thresholds_must_be_ordered() {
		assert!(SweepThresholds::new(5_000, 5_000).is_err());
		assert!(SweepThresholds::new(0, 5_000).is_err());
		assert!(SweepThresholds::new(1_000, 5_000).is_ok());
	}
}
