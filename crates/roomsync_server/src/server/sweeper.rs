#![forbid(unsafe_code)]

use std::time::Duration;

use roomsync_engine::AgingSweep;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::util::time::unix_ms_now;

/// Run the aging sweep on a fixed interval until the process exits.
/// A failed pass is logged and retried on the next tick.
pub fn spawn_sweeper(sweep: AgingSweep, interval: Duration) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			ticker.tick().await;

			let now = unix_ms_now();
			match sweep.run(now).await {
				Ok(report) => {
					metrics::counter!("roomsync_server_sweep_passes_total").increment(1);
					metrics::counter!("roomsync_server_sweep_marked_afk_total").increment(report.marked_afk);
					metrics::counter!("roomsync_server_sweep_disconnected_total").increment(report.disconnected);
					metrics::counter!("roomsync_server_sweep_hosts_transferred_total")
						.increment(report.hosts_transferred);
					metrics::counter!("roomsync_server_sweep_rooms_deleted_total").increment(report.rooms_deleted);
					metrics::counter!("roomsync_server_sweep_failed_rooms_total").increment(report.failed_rooms);

					if report.marked_afk > 0 || report.disconnected > 0 || report.rooms_deleted > 0 {
						info!(
							rooms = report.rooms_swept,
							marked_afk = report.marked_afk,
							disconnected = report.disconnected,
							hosts_transferred = report.hosts_transferred,
							rooms_deleted = report.rooms_deleted,
							failed = report.failed_rooms,
							"sweep pass applied transitions"
						);
					} else {
						debug!(rooms = report.rooms_swept, "sweep pass: nothing to do");
					}
				}
				Err(e) => {
					metrics::counter!("roomsync_server_sweep_errors_total").increment(1);
					warn!(error = %e, "sweep pass failed; will retry on next tick");
				}
			}
		}
	})
}
