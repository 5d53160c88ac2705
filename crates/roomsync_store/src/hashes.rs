#![forbid(unsafe_code)]

use anyhow::Context;
use roomsync_domain::{ResourceKind, RoomId};

pub async fn get_in<'e, E>(exec: E, room: &RoomId, kind: ResourceKind) -> anyhow::Result<Option<String>>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let row: Option<(String,)> =
		sqlx::query_as("SELECT hash FROM resource_hashes WHERE room_id = ? AND resource_kind = ?")
			.bind(room.as_str())
			.bind(kind.as_str())
			.fetch_optional(exec)
			.await
			.context("select resource hash")?;
	Ok(row.map(|(h,)| h))
}

pub async fn put_in<'e, E>(exec: E, room: &RoomId, kind: ResourceKind, hash: &str, now: i64) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query(
		"INSERT INTO resource_hashes (room_id, resource_kind, hash, updated_at) VALUES (?, ?, ?, ?) \
		ON CONFLICT(room_id, resource_kind) DO UPDATE SET hash = excluded.hash, updated_at = excluded.updated_at",
	)
	.bind(room.as_str())
	.bind(kind.as_str())
	.bind(hash)
	.bind(now)
	.execute(exec)
	.await
	.context("upsert resource hash")?;
	Ok(())
}

pub async fn delete_room_in<'e, E>(exec: E, room: &RoomId) -> anyhow::Result<u64>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("DELETE FROM resource_hashes WHERE room_id = ?")
		.bind(room.as_str())
		.execute(exec)
		.await
		.context("delete room resource hashes")?;
	Ok(res.rows_affected())
}
