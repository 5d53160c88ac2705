#![forbid(unsafe_code)]

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Handle to the shared relational store. Cheap to clone; all engine
/// components share one pool and coordinate purely through row locks.
#[derive(Debug, Clone)]
pub struct Store {
	pool: SqlitePool,
}

impl Store {
	/// Connect and run migrations. Only `sqlite:` URLs are supported.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			let opts = SqliteConnectOptions::from_str(database_url)
				.context("parse sqlite url")?
				.create_if_missing(true)
				.busy_timeout(Duration::from_secs(5));
			let pool = SqlitePoolOptions::new()
				.connect_with(opts)
				.await
				.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;

			Ok(Self { pool })
		} else {
			Err(anyhow!("unsupported database_url (use sqlite:)"))
		}
	}

	/// Fresh in-memory store, used by tests throughout the workspace.
	pub async fn in_memory() -> anyhow::Result<Self> {
		let opts = SqliteConnectOptions::from_str("sqlite::memory:").context("parse sqlite url")?;
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts)
			.await
			.context("connect in-memory sqlite")?;
		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;

		Ok(Self { pool })
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Begin a transaction; callers own commit/rollback.
	pub async fn begin(&self) -> anyhow::Result<sqlx::Transaction<'static, sqlx::Sqlite>> {
		self.pool.begin().await.context("begin transaction")
	}
}
