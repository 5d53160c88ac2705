#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.roomsync/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".roomsync").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);
	validate(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub store: StoreSettings,
	pub sync: SyncSettings,
	pub presence: PresenceSettings,
	pub sweep: SweepSettings,
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Bind address (host:port) for the HTTP API.
	pub bind: String,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

/// Store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
	/// Database URL (sqlite:).
	pub database_url: String,
}

/// Delta-fetch and streaming settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
	/// Cap on events returned by one fetch.
	pub fetch_limit: i64,
	/// Sleep between iterations of a streaming connection.
	pub stream_poll_interval: Duration,
	/// Wall-clock bound on one streaming connection; clients reconnect
	/// with their cursor.
	pub stream_max_duration: Duration,
}

/// Presence aging thresholds.
#[derive(Debug, Clone)]
pub struct PresenceSettings {
	pub afk_after: Duration,
	pub disconnect_after: Duration,
}

/// Aging sweep scheduling.
#[derive(Debug, Clone)]
pub struct SweepSettings {
	pub enabled: bool,
	pub interval: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			server: ServerSettings {
				bind: "127.0.0.1:8370".to_string(),
				metrics_bind: None,
			},
			store: StoreSettings {
				database_url: "sqlite:roomsync.db".to_string(),
			},
			sync: SyncSettings {
				fetch_limit: 50,
				stream_poll_interval: Duration::from_millis(1_000),
				stream_max_duration: Duration::from_secs(55),
			},
			presence: PresenceSettings {
				afk_after: Duration::from_secs(120),
				disconnect_after: Duration::from_secs(600),
			},
			sweep: SweepSettings {
				enabled: true,
				interval: Duration::from_secs(30),
			},
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	store: FileStoreSettings,

	#[serde(default)]
	sync: FileSyncSettings,

	#[serde(default)]
	presence: FilePresenceSettings,

	#[serde(default)]
	sweep: FileSweepSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStoreSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSyncSettings {
	fetch_limit: Option<i64>,
	stream_poll_interval_ms: Option<u64>,
	stream_max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePresenceSettings {
	afk_after_secs: Option<u64>,
	disconnect_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSweepSettings {
	enabled: Option<bool>,
	interval_secs: Option<u64>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerConfig::default();

		Self {
			server: ServerSettings {
				bind: file
					.server
					.bind
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(defaults.server.bind),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
			},
			store: StoreSettings {
				database_url: file
					.store
					.database_url
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(defaults.store.database_url),
			},
			sync: SyncSettings {
				fetch_limit: file.sync.fetch_limit.filter(|v| *v > 0).unwrap_or(defaults.sync.fetch_limit),
				stream_poll_interval: file
					.sync
					.stream_poll_interval_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis)
					.unwrap_or(defaults.sync.stream_poll_interval),
				stream_max_duration: file
					.sync
					.stream_max_duration_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(defaults.sync.stream_max_duration),
			},
			presence: PresenceSettings {
				afk_after: file
					.presence
					.afk_after_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(defaults.presence.afk_after),
				disconnect_after: file
					.presence
					.disconnect_after_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(defaults.presence.disconnect_after),
			},
			sweep: SweepSettings {
				enabled: file.sweep.enabled.unwrap_or(defaults.sweep.enabled),
				interval: file
					.sweep
					.interval_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(defaults.sweep.interval),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("ROOMSYNC_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.bind = v;
			info!("server config: bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMSYNC_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMSYNC_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.store.database_url = v;
			info!("store config: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMSYNC_FETCH_LIMIT")
		&& let Ok(limit) = v.trim().parse::<i64>()
		&& limit > 0
	{
		cfg.sync.fetch_limit = limit;
		info!(limit, "sync config: fetch_limit overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMSYNC_STREAM_POLL_INTERVAL_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.sync.stream_poll_interval = Duration::from_millis(ms);
		info!(ms, "sync config: stream_poll_interval overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMSYNC_STREAM_MAX_DURATION_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.sync.stream_max_duration = Duration::from_secs(secs);
		info!(secs, "sync config: stream_max_duration overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMSYNC_AFK_AFTER_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.presence.afk_after = Duration::from_secs(secs);
		info!(secs, "presence config: afk_after overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMSYNC_DISCONNECT_AFTER_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.presence.disconnect_after = Duration::from_secs(secs);
		info!(secs, "presence config: disconnect_after overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMSYNC_SWEEP_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.sweep.enabled = enabled;
		info!(enabled, "sweep config: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMSYNC_SWEEP_INTERVAL_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.sweep.interval = Duration::from_secs(secs);
		info!(secs, "sweep config: interval overridden by env");
	}
}

fn validate(cfg: &mut ServerConfig) {
	// The sweep needs a strict afk < disconnect ordering.
	if cfg.presence.afk_after == cfg.presence.disconnect_after {
		cfg.presence.disconnect_after = cfg.presence.afk_after * 2;
		warn!(
			afk_secs = cfg.presence.afk_after.as_secs(),
			disconnect_secs = cfg.presence.disconnect_after.as_secs(),
			"presence config: afk_after equals disconnect_after; widening disconnect_after"
		);
	} else if cfg.presence.afk_after > cfg.presence.disconnect_after {
		warn!(
			afk_secs = cfg.presence.afk_after.as_secs(),
			disconnect_secs = cfg.presence.disconnect_after.as_secs(),
			"presence config: afk_after > disconnect_after; swapping"
		);
		std::mem::swap(&mut cfg.presence.afk_after, &mut cfg.presence.disconnect_after);
	}

	if cfg.sweep.interval >= cfg.presence.afk_after {
		warn!(
			interval_secs = cfg.sweep.interval.as_secs(),
			afk_secs = cfg.presence.afk_after.as_secs(),
			"sweep config: interval is not below afk_after; AFK promotion will lag"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn inverted_thresholds_are_swapped() {
		let mut cfg = ServerConfig::default();
		cfg.presence.afk_after = Duration::from_secs(600);
		cfg.presence.disconnect_after = Duration::from_secs(120);

		validate(&mut cfg);
		assert_eq!(cfg.presence.afk_after, Duration::from_secs(120));
		assert_eq!(cfg.presence.disconnect_after, Duration::from_secs(600));
	}

	#[test]
	fn equal_thresholds_get_a_widened_disconnect() {
		let mut cfg = ServerConfig::default();
		cfg.presence.afk_after = Duration::from_secs(120);
		cfg.presence.disconnect_after = Duration::from_secs(120);

		validate(&mut cfg);
		assert!(
			cfg.presence.afk_after < cfg.presence.disconnect_after,
			"validation must restore the strict ordering the sweep requires"
		);
		assert_eq!(cfg.presence.disconnect_after, Duration::from_secs(240));
	}

	#[test]
	fn env_bool_accepts_common_spellings() {
		for v in ["1", "true", "YES", "On"] {
			assert_eq!(parse_env_bool(v), Some(true), "{v}");
		}
		for v in ["0", "false", "NO", "Off"] {
			assert_eq!(parse_env_bool(v), Some(false), "{v}");
		}
		assert_eq!(parse_env_bool("maybe"), None);
	}
}
