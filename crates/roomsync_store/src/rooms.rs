#![forbid(unsafe_code)]

use anyhow::Context;
use roomsync_domain::{RoomId, RoomRecord, UserId};

use crate::store::Store;

type RoomRow = (String, String, Option<String>, i64, i64);

fn decode(row: RoomRow) -> anyhow::Result<RoomRecord> {
	let (id, name, host_user_id, permanent, created_at) = row;
	Ok(RoomRecord {
		id: RoomId::new(id).context("decode room id")?,
		name,
		host_user_id: host_user_id.map(UserId::new).transpose().context("decode room host")?,
		permanent: permanent != 0,
		created_at,
	})
}

pub async fn insert_in<'e, E>(exec: E, room: &RoomRecord) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query("INSERT INTO rooms (id, name, host_user_id, permanent, created_at) VALUES (?, ?, ?, ?, ?)")
		.bind(room.id.as_str())
		.bind(&room.name)
		.bind(room.host_user_id.as_ref().map(|u| u.as_str()))
		.bind(room.permanent as i64)
		.bind(room.created_at)
		.execute(exec)
		.await
		.context("insert room")?;
	Ok(())
}

pub async fn get_in<'e, E>(exec: E, id: &RoomId) -> anyhow::Result<Option<RoomRecord>>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let row: Option<RoomRow> =
		sqlx::query_as("SELECT id, name, host_user_id, permanent, created_at FROM rooms WHERE id = ?")
			.bind(id.as_str())
			.fetch_optional(exec)
			.await
			.context("select room")?;

	row.map(decode).transpose()
}

pub async fn list_ids_in<'e, E>(exec: E) -> anyhow::Result<Vec<RoomId>>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM rooms ORDER BY id ASC")
		.fetch_all(exec)
		.await
		.context("select room ids")?;

	rows.into_iter()
		.map(|(id,)| RoomId::new(id).context("decode room id"))
		.collect()
}

/// Update the host pointer. `None` leaves the room host-less.
pub async fn set_host_in<'e, E>(exec: E, id: &RoomId, host: Option<&UserId>) -> anyhow::Result<()>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query("UPDATE rooms SET host_user_id = ? WHERE id = ?")
		.bind(host.map(|u| u.as_str()))
		.bind(id.as_str())
		.execute(exec)
		.await
		.context("update room host")?;
	Ok(())
}

pub async fn update_settings_in<'e, E>(exec: E, id: &RoomId, name: &str, permanent: bool) -> anyhow::Result<bool>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("UPDATE rooms SET name = ?, permanent = ? WHERE id = ?")
		.bind(name)
		.bind(permanent as i64)
		.bind(id.as_str())
		.execute(exec)
		.await
		.context("update room settings")?;
	Ok(res.rows_affected() > 0)
}

pub async fn delete_in<'e, E>(exec: E, id: &RoomId) -> anyhow::Result<bool>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	let res = sqlx::query("DELETE FROM rooms WHERE id = ?")
		.bind(id.as_str())
		.execute(exec)
		.await
		.context("delete room")?;
	Ok(res.rows_affected() > 0)
}

impl Store {
	pub async fn room(&self, id: &RoomId) -> anyhow::Result<Option<RoomRecord>> {
		get_in(self.pool(), id).await
	}

	pub async fn room_ids(&self) -> anyhow::Result<Vec<RoomId>> {
		list_ids_in(self.pool()).await
	}
}
