#![forbid(unsafe_code)]

use anyhow::Context;
use roomsync_domain::{PresenceRecord, RoomId, UserId};

use crate::store::Store;

type PresenceRow = (String, String, i64, i64, i64, Option<i64>, i64, i64);

const PRESENCE_COLUMNS: &str = "room_id, user_id, is_host, is_afk, manual_afk, afk_since, joined_at, last_activity";

fn decode(row: PresenceRow) -> anyhow::Result<PresenceRecord> {
	let (room_id, user_id, is_host, is_afk, manual_afk, afk_since, joined_at, last_activity) = row;
	Ok(PresenceRecord {
		room_id: RoomId::new(room_id).context("decode presence room_id")?,
		user_id: UserId::new(user_id).context("decode presence user_id")?,
		is_host: is_host != 0,
		is_afk: is_afk != 0,
		manual_afk: manual_afk != 0,
		afk_since,
		joined_at,
		last_activity,
	})
}

pub async fn insert_in<'e, E>(exec: E, p: &PresenceRecord) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query(
		"INSERT INTO presences (room_id, user_id, is_host, is_afk, manual_afk, afk_since, joined_at, last_activity) \
		VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(p.room_id.as_str())
	.bind(p.user_id.as_str())
	.bind(p.is_host as i64)
	.bind(p.is_afk as i64)
	.bind(p.manual_afk as i64)
	.bind(p.afk_since)
	.bind(p.joined_at)
	.bind(p.last_activity)
	.execute(exec)
	.await
	.context("insert presence")?;
	Ok(())
}

pub async fn get_in<'e, E>(exec: E, room: &RoomId, user: &UserId) -> anyhow::Result<Option<PresenceRecord>>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let row: Option<PresenceRow> = sqlx::query_as(&format!(
		"SELECT {PRESENCE_COLUMNS} FROM presences WHERE room_id = ? AND user_id = ?"
	))
	.bind(room.as_str())
	.bind(user.as_str())
	.fetch_optional(exec)
	.await
	.context("select presence")?;

	row.map(decode).transpose()
}

/// All presences of a room in failover promotion order: earliest joiner
/// first, ties broken by lowest rowid.
pub async fn list_in<'e, E>(exec: E, room: &RoomId) -> anyhow::Result<Vec<PresenceRecord>>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let rows: Vec<PresenceRow> = sqlx::query_as(&format!(
		"SELECT {PRESENCE_COLUMNS} FROM presences WHERE room_id = ? ORDER BY joined_at ASC, rowid ASC"
	))
	.bind(room.as_str())
	.fetch_all(exec)
	.await
	.context("select room presences")?;

	rows.into_iter().map(decode).collect()
}

pub async fn host_in<'e, E>(exec: E, room: &RoomId) -> anyhow::Result<Option<PresenceRecord>>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let row: Option<PresenceRow> = sqlx::query_as(&format!(
		"SELECT {PRESENCE_COLUMNS} FROM presences WHERE room_id = ? AND is_host = 1 LIMIT 1"
	))
	.bind(room.as_str())
	.fetch_optional(exec)
	.await
	.context("select host presence")?;

	row.map(decode).transpose()
}

pub async fn touch_in<'e, E>(exec: E, room: &RoomId, user: &UserId, now: i64) -> anyhow::Result<bool>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("UPDATE presences SET last_activity = ? WHERE room_id = ? AND user_id = ?")
		.bind(now)
		.bind(room.as_str())
		.bind(user.as_str())
		.execute(exec)
		.await
		.context("update last_activity")?;
	Ok(res.rows_affected() > 0)
}

/// Enter AFK. `manual` distinguishes a user toggle from sweep aging.
pub async fn set_afk_in<'e, E>(exec: E, room: &RoomId, user: &UserId, manual: bool, now: i64) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query("UPDATE presences SET is_afk = 1, manual_afk = ?, afk_since = ? WHERE room_id = ? AND user_id = ?")
		.bind(manual as i64)
		.bind(now)
		.bind(room.as_str())
		.bind(user.as_str())
		.execute(exec)
		.await
		.context("set afk flags")?;
	Ok(())
}

pub async fn clear_afk_in<'e, E>(exec: E, room: &RoomId, user: &UserId) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query(
		"UPDATE presences SET is_afk = 0, manual_afk = 0, afk_since = NULL WHERE room_id = ? AND user_id = ?",
	)
	.bind(room.as_str())
	.bind(user.as_str())
	.execute(exec)
	.await
	.context("clear afk flags")?;
	Ok(())
}

pub async fn delete_in<'e, E>(exec: E, room: &RoomId, user: &UserId) -> anyhow::Result<bool>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("DELETE FROM presences WHERE room_id = ? AND user_id = ?")
		.bind(room.as_str())
		.bind(user.as_str())
		.execute(exec)
		.await
		.context("delete presence")?;
	Ok(res.rows_affected() > 0)
}

pub async fn delete_room_in<'e, E>(exec: E, room: &RoomId) -> anyhow::Result<u64>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("DELETE FROM presences WHERE room_id = ?")
		.bind(room.as_str())
		.execute(exec)
		.await
		.context("delete room presences")?;
	Ok(res.rows_affected())
}

/// Clear every host flag in a room. Failover runs this before promoting
/// so at most one flagged row ever commits.
pub async fn clear_host_flags_in<'e, E>(exec: E, room: &RoomId) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query("UPDATE presences SET is_host = 0 WHERE room_id = ?")
		.bind(room.as_str())
		.execute(exec)
		.await
		.context("clear host flags")?;
	Ok(())
}

pub async fn set_host_flag_in<'e, E>(exec: E, room: &RoomId, user: &UserId) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query("UPDATE presences SET is_host = 1 WHERE room_id = ? AND user_id = ?")
		.bind(room.as_str())
		.bind(user.as_str())
		.execute(exec)
		.await
		.context("set host flag")?;
	Ok(())
}

impl Store {
	pub async fn presence(&self, room: &RoomId, user: &UserId) -> anyhow::Result<Option<PresenceRecord>> {
		get_in(self.pool(), room, user).await
	}

	pub async fn room_presences(&self, room: &RoomId) -> anyhow::Result<Vec<PresenceRecord>> {
		list_in(self.pool(), room).await
	}
}
