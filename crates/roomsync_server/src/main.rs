#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use roomsync_engine::{AgingSweep, NullProjector, SweepThresholds};
use roomsync_store::Store;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::api::Api;
use crate::server::health::HealthState;
use crate::server::http::{AppState, run_http_server};
use crate::server::sweeper::spawn_sweeper;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: roomsync_server [--bind host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     Bind address for the HTTP API (overrides config)\n\
\t--config   Config file path (default: ~/.roomsync/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	bind: Option<String>,
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				args.bind = Some(v);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,roomsync_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("roomsync_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	if let Some(bind) = args.bind {
		server_cfg.server.bind = bind;
	}
	let bind_addr: SocketAddr = server_cfg
		.server
		.bind
		.parse()
		.map_err(|e| anyhow::anyhow!("invalid bind address {:?}: {e}", server_cfg.server.bind))?;

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let store = Store::connect(&server_cfg.store.database_url).await?;
	info!("store connected and migrated");

	let thresholds = SweepThresholds::new(
		server_cfg.presence.afk_after.as_millis() as i64,
		server_cfg.presence.disconnect_after.as_millis() as i64,
	)?;

	let api = Api::new(
		store.clone(),
		Arc::new(NullProjector),
		thresholds,
		server_cfg.sync.fetch_limit,
	);

	if server_cfg.sweep.enabled {
		let sweep = AgingSweep::new(store.clone(), thresholds);
		spawn_sweeper(sweep, server_cfg.sweep.interval);
		info!(interval_secs = server_cfg.sweep.interval.as_secs(), "sweeper running");
	} else {
		warn!("sweeper disabled by config; presence will not age out");
	}

	let health = HealthState::new();
	health.mark_ready();

	let state = AppState {
		api,
		health,
		stream_poll_interval: server_cfg.sync.stream_poll_interval,
		stream_max_duration: server_cfg.sync.stream_max_duration,
	};

	info!(%bind_addr, "roomsync_server listening");
	run_http_server(bind_addr, state).await
}
