#![forbid(unsafe_code)]

use anyhow::Context;
use roomsync_domain::{EventId, EventKind, EventRecord, RoomId, RoomScope};

use crate::store::Store;

/// Default cap on a single `fetch_since` batch.
pub const DEFAULT_FETCH_LIMIT: i64 = 50;

/// Append one event. Write paths call this as the final statement of
/// their own transaction so a failed write never leaves a visible event.
pub async fn append_in<'e, E>(
	exec: E,
	scope: &RoomScope,
	kind: EventKind,
	payload: &[u8],
	now: i64,
) -> anyhow::Result<EventId>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("INSERT INTO events (room_scope, kind, payload, created_at) VALUES (?, ?, ?, ?)")
		.bind(scope.as_str())
		.bind(kind.as_str())
		.bind(payload)
		.bind(now)
		.execute(exec)
		.await
		.context("insert event")?;

	Ok(EventId(res.last_insert_rowid()))
}

/// Events with `id > after` scoped to `room` or broadcast, id ascending,
/// capped at `limit`. Side-effect-free.
pub async fn fetch_since_in<'e, E>(exec: E, room: &RoomId, after: EventId, limit: i64) -> anyhow::Result<Vec<EventRecord>>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let rows = sqlx::query_as::<_, (i64, String, String, Vec<u8>, i64)>(
		"SELECT id, room_scope, kind, payload, created_at FROM events \
		WHERE id > ? AND (room_scope = ? OR room_scope = ?) ORDER BY id ASC LIMIT ?",
	)
	.bind(after.as_i64())
	.bind(room.as_str())
	.bind(RoomScope::BROADCAST)
	.bind(limit)
	.fetch_all(exec)
	.await
	.context("select events since cursor")?;

	let mut out = Vec::with_capacity(rows.len());
	for (id, scope, kind, payload, created_at) in rows {
		out.push(EventRecord {
			id: EventId(id),
			scope: RoomScope::parse(&scope).context("decode event scope")?,
			kind: kind.parse::<EventKind>().context("decode event kind")?,
			payload,
			created_at,
		});
	}
	Ok(out)
}

/// Highest id ever appended (0 on an empty log). Used to clamp stale or
/// out-of-range client cursors.
pub async fn latest_event_id_in<'e, E>(exec: E) -> anyhow::Result<EventId>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let (id,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM events")
		.fetch_one(exec)
		.await
		.context("select max event id")?;
	Ok(EventId(id))
}

/// Delete every event scoped to one room. Only ephemeral-room teardown
/// calls this; the log is append-only to everyone else.
pub async fn delete_room_scoped_in<'e, E>(exec: E, room: &RoomId) -> anyhow::Result<u64>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("DELETE FROM events WHERE room_scope = ?")
		.bind(room.as_str())
		.execute(exec)
		.await
		.context("delete room-scoped events")?;
	Ok(res.rows_affected())
}

impl Store {
	pub async fn append_event(
		&self,
		scope: &RoomScope,
		kind: EventKind,
		payload: &[u8],
		now: i64,
	) -> anyhow::Result<EventId> {
		append_in(self.pool(), scope, kind, payload, now).await
	}

	pub async fn fetch_since(&self, room: &RoomId, after: EventId, limit: i64) -> anyhow::Result<Vec<EventRecord>> {
		fetch_since_in(self.pool(), room, after, limit).await
	}

	pub async fn latest_event_id(&self) -> anyhow::Result<EventId> {
		latest_event_id_in(self.pool()).await
	}
}
