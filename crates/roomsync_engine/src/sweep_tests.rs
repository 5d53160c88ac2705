#![forbid(unsafe_code)]

use roomsync_domain::{EventId, EventKind, RoomId, RoomRecord, UserId};
use roomsync_store::{Store, rooms};

use crate::presence::PresenceTracker;
use crate::sweep::{AgingSweep, SweepThresholds};

const T_AFK: i64 = 60_000;
const T_DISCONNECT: i64 = 300_000;

fn thresholds() -> SweepThresholds {
	SweepThresholds::new(T_AFK, T_DISCONNECT).expect("thresholds")
}

fn room(id: &str) -> RoomId {
	RoomId::new(id).expect("valid RoomId")
}

fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

async fn seed_room(store: &Store, id: &str, permanent: bool) -> RoomId {
	let rid = room(id);
	rooms::insert_in(
		store.pool(),
		&RoomRecord {
			id: rid.clone(),
			name: format!("room {id}"),
			host_user_id: None,
			permanent,
			created_at: 0,
		},
	)
	.await
	.expect("insert room");
	rid
}

#[tokio::test]
async fn stale_host_fails_over_to_next_joiner() {
	let store = Store::in_memory().await.expect("store");
	let tracker = PresenceTracker::new(store.clone());
	let sweep = AgingSweep::new(store.clone(), thresholds());
	let rid = seed_room(&store, "r", true).await;

	tracker.join(&rid, &user("a"), 0).await.expect("join a");
	tracker.join(&rid, &user("b"), 1_000).await.expect("join b");
	let pre_sweep_max = store.latest_event_id().await.expect("latest");

	// Keep B fresh; let A age past T_disconnect.
	tracker.touch(&rid, &user("b"), T_DISCONNECT).await.expect("touch b");
	let report = sweep.run(T_DISCONNECT + 1).await.expect("sweep");

	assert_eq!(report.disconnected, 1);
	assert_eq!(report.hosts_transferred, 1);
	assert_eq!(report.rooms_deleted, 0);

	let room_rec = store.room(&rid).await.expect("room").expect("room survives");
	assert_eq!(room_rec.host_user_id, Some(user("b")));

	let batch = store.fetch_since(&rid, pre_sweep_max, 50).await.expect("fetch");
	let transfers: Vec<_> = batch.iter().filter(|e| e.kind == EventKind::HostTransferred).collect();
	assert_eq!(transfers.len(), 1);
	assert!(transfers[0].id > pre_sweep_max);

	let payload: serde_json::Value = serde_json::from_slice(&transfers[0].payload).expect("payload");
	assert_eq!(payload["new_host"], "b");

	let hosts = store
		.room_presences(&rid)
		.await
		.expect("list")
		.into_iter()
		.filter(|p| p.is_host)
		.count();
	assert_eq!(hosts, 1);
}

#[tokio::test]
async fn stale_last_member_tears_down_ephemeral_room() {
	let store = Store::in_memory().await.expect("store");
	let tracker = PresenceTracker::new(store.clone());
	let sweep = AgingSweep::new(store.clone(), thresholds());
	let rid = seed_room(&store, "r", false).await;

	tracker.join(&rid, &user("a"), 0).await.expect("join");
	let report = sweep.run(T_DISCONNECT + 1).await.expect("sweep");

	assert_eq!(report.disconnected, 1);
	assert_eq!(report.rooms_deleted, 1);

	assert!(store.room(&rid).await.expect("room").is_none());
	assert!(store.room_presences(&rid).await.expect("list").is_empty());
	assert!(
		store.fetch_since(&rid, EventId::ZERO, 50).await.expect("fetch").is_empty(),
		"no unresolved events may remain scoped to a torn-down room"
	);
}

#[tokio::test]
async fn stale_last_member_leaves_permanent_room_hostless() {
	let store = Store::in_memory().await.expect("store");
	let tracker = PresenceTracker::new(store.clone());
	let sweep = AgingSweep::new(store.clone(), thresholds());
	let rid = seed_room(&store, "r", true).await;

	tracker.join(&rid, &user("a"), 0).await.expect("join");
	let report = sweep.run(T_DISCONNECT + 1).await.expect("sweep");

	assert_eq!(report.disconnected, 1);
	assert_eq!(report.rooms_deleted, 0);

	let room_rec = store.room(&rid).await.expect("room").expect("room survives");
	assert_eq!(room_rec.host_user_id, None);

	let kinds: Vec<_> = store
		.fetch_since(&rid, EventId::ZERO, 50)
		.await
		.expect("fetch")
		.into_iter()
		.map(|e| e.kind)
		.collect();
	assert!(kinds.contains(&EventKind::UserLeave));
	assert!(kinds.contains(&EventKind::RoomUpdate));
}

#[tokio::test]
async fn idle_band_marks_afk_once() {
	let store = Store::in_memory().await.expect("store");
	let tracker = PresenceTracker::new(store.clone());
	let sweep = AgingSweep::new(store.clone(), thresholds());
	let rid = seed_room(&store, "r", true).await;
	let u = user("a");

	tracker.join(&rid, &u, 0).await.expect("join");

	let report = sweep.run(T_AFK + 1).await.expect("sweep");
	assert_eq!(report.marked_afk, 1);
	assert_eq!(report.disconnected, 0);

	let snap = tracker.snapshot(&rid, &u).await.expect("snapshot");
	assert!(snap.is_afk);
	assert!(!snap.manual_afk);
	assert_eq!(snap.afk_since, Some(T_AFK + 1));

	// A second pass in the same band is a no-op: no duplicate event.
	let report = sweep.run(T_AFK + 2).await.expect("sweep");
	assert_eq!(report.marked_afk, 0);

	let entered = store
		.fetch_since(&rid, EventId::ZERO, 50)
		.await
		.expect("fetch")
		.into_iter()
		.filter(|e| e.kind == EventKind::AfkEntered)
		.count();
	assert_eq!(entered, 1);
}

#[tokio::test]
async fn sweep_disconnect_of_non_host_keeps_host() {
	let store = Store::in_memory().await.expect("store");
	let tracker = PresenceTracker::new(store.clone());
	let sweep = AgingSweep::new(store.clone(), thresholds());
	let rid = seed_room(&store, "r", true).await;

	tracker.join(&rid, &user("a"), 0).await.expect("join a");
	tracker.join(&rid, &user("b"), 0).await.expect("join b");
	tracker.touch(&rid, &user("a"), T_DISCONNECT).await.expect("touch a");

	let report = sweep.run(T_DISCONNECT + 1).await.expect("sweep");
	assert_eq!(report.disconnected, 1);
	assert_eq!(report.hosts_transferred, 0);

	let room_rec = store.room(&rid).await.expect("room").expect("exists");
	assert_eq!(room_rec.host_user_id, Some(user("a")));
}

#[tokio::test]
async fn manual_afk_toggle_counts_as_activity() {
	let store = Store::in_memory().await.expect("store");
	let tracker = PresenceTracker::new(store.clone());
	let sweep = AgingSweep::new(store.clone(), thresholds());
	let rid = seed_room(&store, "r", true).await;
	let u = user("a");

	tracker.join(&rid, &u, 0).await.expect("join");
	tracker
		.set_manual_afk(&rid, &u, true, T_DISCONNECT - 1)
		.await
		.expect("afk on");

	// The toggle just happened; the next pass must not disconnect.
	let report = sweep.run(T_DISCONNECT + 1).await.expect("sweep");
	assert_eq!(report.disconnected, 0);

	let snap = tracker.snapshot(&rid, &u).await.expect("snapshot");
	assert!(snap.is_afk);
	assert!(snap.manual_afk);
	assert_eq!(snap.last_activity, T_DISCONNECT - 1);
}

#[tokio::test]
async fn whole_pass_uses_one_sweep_start_timestamp() {
	let store = Store::in_memory().await.expect("store");
	let tracker = PresenceTracker::new(store.clone());
	let sweep = AgingSweep::new(store.clone(), thresholds());
	let rid = seed_room(&store, "r", true).await;

	tracker.join(&rid, &user("a"), 0).await.expect("join a");
	tracker.join(&rid, &user("b"), 100).await.expect("join b");

	let now = T_AFK + 200;
	sweep.run(now).await.expect("sweep");

	// Both idle rows got the same afk_since, the sweep-start now.
	let rows = store.room_presences(&rid).await.expect("list");
	let since: Vec<_> = rows.iter().filter_map(|p| p.afk_since).collect();
	assert_eq!(since, vec![now, now]);
}

#[tokio::test]
async fn empty_rooms_sweep_cleanly() {
	let store = Store::in_memory().await.expect("store");
	let sweep = AgingSweep::new(store.clone(), thresholds());
	seed_room(&store, "empty-permanent", true).await;

	let report = sweep.run(1_000).await.expect("sweep");
	assert_eq!(report.rooms_swept, 1);
	assert_eq!(report.disconnected, 0);
	assert_eq!(report.rooms_deleted, 0);
	assert_eq!(report.failed_rooms, 0);
}
